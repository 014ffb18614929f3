//! the synchronous vector store: load/create, insert, delete, search, compact
//!
//! every method here runs to completion without yielding — they're meant to
//! be called exclusively from the single worker thread [`crate::handle`]
//! dedicates to one database, never concurrently. `base` and `index` are
//! read-only mmaps; only [`VectorDatabase::compact`] ever replaces them.

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::header::{Header, HEADER_SIZE};
use crate::search::{dot_product_i8, ScoreKeeper};
use crate::wal;

const DEFAULT_WAL_SOFT_LIMIT: u64 = 1024 * 1024; // 1 MiB

pub struct VectorDatabase {
    path: PathBuf,
    dimension: usize,
    wal_soft_limit: u64,

    uuid: Uuid,
    base: Mmap,
    index: Mmap,
    index_ids: Vec<u64>,
    wal_file: File,
    wal_size: u64,

    next_id: u64,
    tombstones: HashSet<usize>,
    wal_map: BTreeMap<u64, Vec<i8>>,
    compact_in_progress: bool,
}

fn index_path(path: &Path) -> PathBuf {
    append_suffix(path, "-index")
}

fn wal_path(path: &Path) -> PathBuf {
    append_suffix(path, "-wal")
}

fn new_base_path(path: &Path) -> PathBuf {
    append_suffix(path, "-new")
}

fn new_index_path(path: &Path) -> PathBuf {
    append_suffix(path, "-index-new")
}

fn new_wal_path(path: &Path) -> PathBuf {
    append_suffix(path, "-wal-new")
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

fn parse_index_ids(index: &Mmap) -> Result<Vec<u64>> {
    let body = &index[HEADER_SIZE..];
    if body.len() % 8 != 0 {
        return Err(Error::Malformed("index file size is not a multiple of 8".into()));
    }
    Ok(body
        .chunks_exact(8)
        .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
        .collect())
}

fn mmap_file(path: &Path) -> Result<(File, Mmap)> {
    let file = File::open(path)?;
    // reads only: base/index are never mutated in place, only replaced
    // wholesale by `compact`.
    let mmap = unsafe { Mmap::map(&file)? };
    Ok((file, mmap))
}

impl VectorDatabase {
    /// open `path`, replaying its WAL, or create a fresh empty database
    /// there if any of the three files is missing or fails validation.
    /// returns whether the database was freshly created.
    pub fn load_or_create(
        path: impl Into<PathBuf>,
        dimension: usize,
        wal_soft_limit: Option<u64>,
    ) -> Result<(Self, bool)> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let wal_soft_limit = wal_soft_limit.unwrap_or(DEFAULT_WAL_SOFT_LIMIT);

        match Self::try_load(&path, dimension, wal_soft_limit) {
            Ok(db) => Ok((db, false)),
            Err(err) => {
                tracing::warn!(error = %err, path = %path.display(), "vector db validation failed, recreating");
                let db = Self::create_fresh(path, dimension, wal_soft_limit)?;
                Ok((db, true))
            }
        }
    }

    fn try_load(path: &Path, dimension: usize, wal_soft_limit: u64) -> Result<Self> {
        let (_, base) = mmap_file(path)?;
        let base_header = Header::parse(&base, dimension as u32)?;

        let (_, index) = mmap_file(&index_path(path))?;
        let index_header = Header::parse(&index, dimension as u32)?;
        if index_header.uuid != base_header.uuid {
            return Err(Error::Malformed("index file uuid does not match base file".into()));
        }

        let base_vector_bytes = base.len() - HEADER_SIZE;
        if base_vector_bytes % dimension != 0 {
            return Err(Error::Malformed("base file size is not a multiple of the dimension".into()));
        }
        let base_vector_count = base_vector_bytes / dimension;

        let index_ids = parse_index_ids(&index)?;
        if index_ids.len() != base_vector_count {
            return Err(Error::Malformed("index vector count does not match base vector count".into()));
        }
        if !index_ids.windows(2).all(|w| w[0] < w[1]) {
            return Err(Error::Malformed("index ids are not strictly increasing".into()));
        }

        let wal_path_buf = wal_path(path);
        let wal_bytes = fs::read(&wal_path_buf)?;
        if wal_bytes.len() < HEADER_SIZE {
            return Err(Error::Malformed("wal file shorter than header".into()));
        }
        let wal_header = Header::parse(&wal_bytes[..HEADER_SIZE], dimension as u32)?;
        if wal_header.uuid != base_header.uuid {
            return Err(Error::Malformed("wal file uuid does not match base file".into()));
        }

        let replay = wal::replay(&wal_bytes[HEADER_SIZE..], dimension)?;

        let mut next_id = index_ids.last().map(|&last| last + 1).unwrap_or(1);
        if let Some(max_plus_one) = replay.max_id_plus_one {
            next_id = max_plus_one;
        }

        let mut tombstones = HashSet::new();
        for id in &replay.base_deleted_ids {
            if let Ok(slot) = index_ids.binary_search(id) {
                tombstones.insert(slot);
            }
        }

        let wal_file = OpenOptions::new().append(true).open(&wal_path_buf)?;
        let wal_size = wal_bytes.len() as u64;

        let (_, base) = mmap_file(path)?;
        let (_, index) = mmap_file(&index_path(path))?;

        Ok(Self {
            path: path.to_path_buf(),
            dimension,
            wal_soft_limit,
            uuid: base_header.uuid,
            base,
            index,
            index_ids,
            wal_file,
            wal_size,
            next_id,
            tombstones,
            wal_map: replay.wal_map,
            compact_in_progress: false,
        })
    }

    fn create_fresh(path: PathBuf, dimension: usize, wal_soft_limit: u64) -> Result<Self> {
        let uuid = Uuid::new_v4();
        let header = Header::new(uuid, dimension as u32).to_bytes();

        fs::write(&path, header)?;
        fs::write(index_path(&path), header)?;
        fs::write(wal_path(&path), header)?;

        let wal_file = OpenOptions::new().append(true).open(wal_path(&path))?;
        let (_, base) = mmap_file(&path)?;
        let (_, index) = mmap_file(&index_path(&path))?;

        Ok(Self {
            path,
            dimension,
            wal_soft_limit,
            uuid,
            base,
            index,
            index_ids: Vec::new(),
            wal_file,
            wal_size: HEADER_SIZE as u64,
            next_id: 1,
            tombstones: HashSet::new(),
            wal_map: BTreeMap::new(),
            compact_in_progress: false,
        })
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn index_path(&self) -> PathBuf {
        index_path(&self.path)
    }

    fn wal_path(&self) -> PathBuf {
        wal_path(&self.path)
    }

    fn append_wal(&mut self, record: &[u8]) -> Result<()> {
        let pre_size = self.wal_size;
        match self.wal_file.write_all(record).and_then(|_| self.wal_file.sync_all()) {
            Ok(()) => {
                self.wal_size += record.len() as u64;
                Ok(())
            }
            Err(err) => {
                let _ = self.wal_file.set_len(pre_size);
                let _ = self.wal_file.seek(SeekFrom::End(0));
                Err(Error::Io(err))
            }
        }
    }

    /// inserts `vector`, returning its fresh id and whether the WAL has
    /// grown past its soft limit (a hint the caller may want to `compact`).
    pub fn insert(&mut self, vector: &[i8]) -> Result<(u64, bool)> {
        if vector.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                got: vector.len(),
            });
        }
        let id = self.next_id;
        self.append_wal(&wal::encode_insert(id, vector))?;
        self.next_id += 1;
        self.wal_map.insert(id, vector.to_vec());
        Ok((id, self.suggests_compact()))
    }

    /// deletes `id` if it is live, idempotently. returns whether the WAL
    /// has grown past its soft limit.
    pub fn delete(&mut self, id: u64) -> Result<bool> {
        if self.wal_map.remove(&id).is_some() {
            self.append_wal(&wal::encode_delete(id))?;
        } else if let Ok(slot) = self.index_ids.binary_search(&id) {
            self.tombstones.insert(slot);
            self.append_wal(&wal::encode_delete(id))?;
        }
        Ok(self.suggests_compact())
    }

    fn suggests_compact(&self) -> bool {
        self.wal_size >= self.wal_soft_limit && !self.compact_in_progress
    }

    /// top-K ids by descending dot product against `query`, scanning the
    /// base file first (skipping tombstoned slots) and then live WAL
    /// entries, merged into one bounded keeper.
    pub fn search_top_k(&self, query: &[i8], k: usize) -> Result<Vec<u64>> {
        if query.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                got: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let base_body = &self.base[HEADER_SIZE..];
        let mut base_keeper: ScoreKeeper<usize> = ScoreKeeper::new(k);
        for slot in 0..self.index_ids.len() {
            if self.tombstones.contains(&slot) {
                continue;
            }
            let start = slot * self.dimension;
            let bytes = &base_body[start..start + self.dimension];
            // int8 and u8 share a representation; this reinterprets without copying.
            let vector: &[i8] =
                unsafe { std::slice::from_raw_parts(bytes.as_ptr().cast(), bytes.len()) };
            let score = dot_product_i8(self.dimension, query, vector);
            base_keeper.add_score(score, slot);
        }

        let mut id_keeper: ScoreKeeper<u64> = ScoreKeeper::new(k);
        for (score, slot) in base_keeper.into_sorted_descending_with_scores() {
            id_keeper.add_score(score, self.index_ids[slot]);
        }
        for (&id, vector) in self.wal_map.iter() {
            let score = dot_product_i8(self.dimension, query, vector);
            id_keeper.add_score(score, id);
        }

        Ok(id_keeper.into_sorted_descending())
    }

    /// no-op if a compaction is already running. otherwise rewrites base,
    /// index, and WAL under a fresh uuid, atomically replacing the current
    /// files, then remaps and resets in-memory tombstone/WAL state.
    pub fn compact(&mut self) -> Result<()> {
        if self.compact_in_progress {
            return Ok(());
        }
        self.compact_in_progress = true;
        let result = self.compact_inner();
        self.compact_in_progress = false;
        result
    }

    fn compact_inner(&mut self) -> Result<()> {
        let live_base_count = self.index_ids.len() - self.tombstones.len();
        let new_vector_count = live_base_count + self.wal_map.len();
        let new_uuid = Uuid::new_v4();
        let header = Header::new(new_uuid, self.dimension as u32).to_bytes();

        let new_base_size = HEADER_SIZE as u64 + (new_vector_count * self.dimension) as u64;
        let new_index_size = HEADER_SIZE as u64 + (new_vector_count * 8) as u64;

        let new_base_file_path = new_base_path(&self.path);
        let new_index_file_path = new_index_path(&self.path);
        let new_wal_file_path = new_wal_path(&self.path);

        let mut new_base_file = File::create(&new_base_file_path)?;
        new_base_file.set_len(new_base_size)?;
        new_base_file.write_all(&header)?;

        let mut new_index_file = File::create(&new_index_file_path)?;
        new_index_file.set_len(new_index_size)?;
        new_index_file.write_all(&header)?;

        let mut new_wal_file = File::create(&new_wal_file_path)?;
        new_wal_file.write_all(&header)?;

        let base_body = &self.base[HEADER_SIZE..];
        for slot in 0..self.index_ids.len() {
            if self.tombstones.contains(&slot) {
                continue;
            }
            let start = slot * self.dimension;
            new_base_file.write_all(&base_body[start..start + self.dimension])?;
            new_index_file.write_all(&self.index_ids[slot].to_le_bytes())?;
        }
        for (&id, vector) in self.wal_map.iter() {
            let bytes: Vec<u8> = vector.iter().map(|&b| b as u8).collect();
            new_base_file.write_all(&bytes)?;
            new_index_file.write_all(&id.to_le_bytes())?;
        }

        new_base_file.sync_all()?;
        new_index_file.sync_all()?;
        new_wal_file.sync_all()?;
        drop(new_base_file);
        drop(new_index_file);
        drop(new_wal_file);

        fs::rename(&new_base_file_path, &self.path)?;
        fs::rename(&new_index_file_path, self.index_path())?;
        fs::rename(&new_wal_file_path, self.wal_path())?;
        if let Some(parent) = self.path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        let (_, base) = mmap_file(&self.path)?;
        let (_, index) = mmap_file(&self.index_path())?;
        self.index_ids = parse_index_ids(&index)?;
        self.base = base;
        self.index = index;
        self.wal_file = OpenOptions::new().append(true).open(self.wal_path())?;
        self.wal_size = HEADER_SIZE as u64;
        self.uuid = new_uuid;
        self.tombstones.clear();
        self.wal_map.clear();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(dir: &tempfile::TempDir, dimension: usize) -> VectorDatabase {
        let path = dir.path().join("vectors.db");
        let (db, newly_created) = VectorDatabase::load_or_create(path, dimension, None).unwrap();
        assert!(newly_created);
        db
    }

    #[test]
    fn insert_then_search_returns_the_inserted_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = open(&dir, 4);
        let (id, _) = db.insert(&[1, 1, 1, 1]).unwrap();
        let results = db.search_top_k(&[1, 1, 1, 1], 1).unwrap();
        assert_eq!(results, vec![id]);
    }

    #[test]
    fn deleted_ids_never_resurface_in_search() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = open(&dir, 4);
        let (id, _) = db.insert(&[1, 1, 1, 1]).unwrap();
        db.delete(id).unwrap();
        let results = db.search_top_k(&[1, 1, 1, 1], 5).unwrap();
        assert!(!results.contains(&id));
    }

    #[test]
    fn delete_of_unknown_id_is_a_harmless_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = open(&dir, 4);
        assert!(db.delete(9999).is_ok());
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = open(&dir, 4);
        assert!(db.insert(&[1, 1]).is_err());
    }

    #[test]
    fn reopen_replays_the_wal_and_reconstructs_live_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.db");
        {
            let (mut db, _) = VectorDatabase::load_or_create(&path, 4, None).unwrap();
            db.insert(&[1, 1, 1, 1]).unwrap(); // id 1
            db.insert(&[2, 2, 2, 2]).unwrap(); // id 2
            db.delete(1).unwrap();
        }
        let (db, newly_created) = VectorDatabase::load_or_create(&path, 4, None).unwrap();
        assert!(!newly_created);
        let results = db.search_top_k(&[1, 1, 1, 1], 1).unwrap();
        assert_eq!(results, vec![2]);
    }

    #[test]
    fn compaction_preserves_the_logical_live_set() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = open(&dir, 4);
        let (a, _) = db.insert(&[1, 1, 1, 1]).unwrap();
        let (b, _) = db.insert(&[2, 2, 2, 2]).unwrap();
        db.delete(a).unwrap();
        db.compact().unwrap();

        let results = db.search_top_k(&[2, 2, 2, 2], 5).unwrap();
        assert_eq!(results, vec![b]);

        // a fresh insert after compaction still allocates unique, increasing ids
        let (c, _) = db.insert(&[3, 3, 3, 3]).unwrap();
        assert!(c > b);
    }

    #[test]
    fn compaction_is_a_no_op_while_already_running() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = open(&dir, 4);
        db.insert(&[1, 1, 1, 1]).unwrap();
        db.compact_in_progress = true;
        assert!(db.compact().is_ok());
        // nothing changed: the uuid from before the no-op call is unchanged
        let uuid_before = db.uuid();
        db.compact_in_progress = false;
        db.compact().unwrap();
        assert_ne!(db.uuid(), uuid_before);
    }

    #[test]
    fn search_respects_k() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = open(&dir, 4);
        for i in 0..5i8 {
            db.insert(&[i, i, i, i]).unwrap();
        }
        let results = db.search_top_k(&[4, 4, 4, 4], 2).unwrap();
        assert_eq!(results.len(), 2);
    }
}
