use std::{
    cell::UnsafeCell,
    cmp::min,
    mem,
    sync::atomic::{AtomicU16, Ordering},
};

use crate::{depth::Depth, eval::Eval, position::Position, r#move::Move, zobrist::Zobrist};

/// The transposition table generation: a tag incremented at every new search so replacement can
/// prefer fresh entries. Wraps into 9 bits.
pub type Generation = u16;

const GENERATION_MASK: Generation = 0x1ff;

/// Type of evaluation stored in the transposition table.
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EntryType {
    /// The stored evaluation is exact.
    Exact = 0,

    /// The stored evaluation is a lower bound (the node failed high).
    LowerBound = 1,

    /// The stored evaluation is an upper bound (the node failed low).
    UpperBound = 2,
}

/// One transposition table entry: the position key plus a data word packing the best move, the
/// generation, the entry type, the search depth and the evaluation. 128 bits in total.
#[repr(align(16))]
#[derive(Clone, Copy)]
pub struct Entry {
    key: Zobrist,
    data: u64,
}

impl Entry {
    const MOVE_SIZE: usize = 27;
    const GENERATION_SIZE: usize = 9;
    const ENTRY_TYPE_SIZE: usize = 2;
    const DEPTH_SIZE: usize = 10;
    const EVAL_SIZE: usize = 16;

    const MOVE_OFFSET: usize = 0;
    const GENERATION_OFFSET: usize = Self::MOVE_OFFSET + Self::MOVE_SIZE;
    const ENTRY_TYPE_OFFSET: usize = Self::GENERATION_OFFSET + Self::GENERATION_SIZE;
    const DEPTH_OFFSET: usize = Self::ENTRY_TYPE_OFFSET + Self::ENTRY_TYPE_SIZE;
    const EVAL_OFFSET: usize = Self::DEPTH_OFFSET + Self::DEPTH_SIZE;

    const EMPTY: Entry = Entry { key: 0, data: 0 };

    /// Creates a new transposition table entry. Mate evaluations are converted to their
    /// node-relative form using `ply`, so a stored mate score is independent of where in the
    /// tree it was found.
    fn new(
        key: Zobrist,
        mv: Option<Move>,
        generation: Generation,
        entry_type: EntryType,
        depth: u16,
        ply: u16,
        eval: Eval,
    ) -> Self {
        debug_assert!(Move::pack(mv) < (1u32 << Self::MOVE_SIZE));
        debug_assert!(generation <= GENERATION_MASK);
        debug_assert!((entry_type as u8) < (1 << Self::ENTRY_TYPE_SIZE));
        debug_assert!(depth < (1 << Self::DEPTH_SIZE));

        let data = (Move::pack(mv) as u64) << Self::MOVE_OFFSET
            | (generation as u64) << Self::GENERATION_OFFSET
            | (entry_type as u8 as u64) << Self::ENTRY_TYPE_OFFSET
            | (depth as u64) << Self::DEPTH_OFFSET
            | (i16::from(eval.remove_ply_from_mate(ply)) as u16 as u64) << Self::EVAL_OFFSET;

        Entry { key, data }
    }

    /// Returns the Zobrist key of the entry.
    pub fn key(&self) -> Zobrist {
        self.key
    }

    /// Returns the best move stored in the entry, if any.
    pub fn mv(&self) -> Option<Move> {
        Move::unpack(((self.data >> Self::MOVE_OFFSET) & ((1u64 << Self::MOVE_SIZE) - 1)) as u32)
    }

    /// Returns the generation of the entry.
    pub fn generation(&self) -> Generation {
        (self.data >> Self::GENERATION_OFFSET & ((1u64 << Self::GENERATION_SIZE) - 1)) as Generation
    }

    /// Returns the type of the entry.
    pub fn entry_type(&self) -> EntryType {
        match self.data >> Self::ENTRY_TYPE_OFFSET & ((1u64 << Self::ENTRY_TYPE_SIZE) - 1) {
            0 => EntryType::Exact,
            1 => EntryType::LowerBound,
            _ => EntryType::UpperBound,
        }
    }

    /// Returns the search depth of the entry, in plies.
    pub fn depth(&self) -> u16 {
        (self.data >> Self::DEPTH_OFFSET & ((1u64 << Self::DEPTH_SIZE) - 1)) as u16
    }

    /// Returns the evaluation of the entry, with mate scores converted back to the root-relative
    /// form for the given ply.
    pub fn get_eval(&self, ply: u16) -> Eval {
        Eval::from((self.data >> Self::EVAL_OFFSET & ((1u64 << Self::EVAL_SIZE) - 1)) as u16 as i16)
            .add_ply_to_mate(ply)
    }
}

/// The number of entries scanned per probe. A cluster shares one cache line pair, so scanning it
/// costs little more than a single entry.
const CLUSTER_SIZE: usize = 4;

type Cluster = [Entry; CLUSTER_SIZE];

/// A shared transposition table.
///
/// The table is read and written by every search thread without any locking. A read may race
/// with a write and observe a torn entry; such an entry fails the key comparison and is ignored.
/// This is deliberate: a rare wasted probe is cheaper than synchronizing every access.
pub struct TranspositionTable {
    table: Box<[UnsafeCell<Cluster>]>,
    mask: usize,
    generation: AtomicU16,
}

// Concurrent writes to the same cluster can only corrupt individual entries, which readers
// detect by the key mismatch. No other invariant depends on the table's contents.
unsafe impl Sync for TranspositionTable {}

impl TranspositionTable {
    /// Default size of the transposition table in megabytes.
    pub const DEFAULT_MB_SIZE: usize = 128;

    /// Creates a new transposition table of approximately the given size in megabytes, rounded
    /// down to a power of two of clusters.
    pub fn new(megabytes: usize) -> Self {
        let bytes = megabytes.max(1) * 1024 * 1024;
        let cluster_count = 1 << (63 - (bytes / mem::size_of::<Cluster>()).leading_zeros());
        let mut vec = Vec::with_capacity(cluster_count);
        vec.resize_with(cluster_count, || UnsafeCell::new([Entry::EMPTY; CLUSTER_SIZE]));
        TranspositionTable { table: vec.into_boxed_slice(), mask: cluster_count - 1, generation: AtomicU16::new(0) }
    }

    /// Removes every entry from the table. Called on `ucinewgame`.
    pub fn clear(&self) {
        for cluster in self.table.iter() {
            unsafe { *cluster.get() = [Entry::EMPTY; CLUSTER_SIZE] };
        }
        self.generation.store(0, Ordering::Release);
    }

    fn cluster(&self, key: Zobrist) -> *mut Entry {
        self.table[(key as usize) & self.mask].get() as *mut Entry
    }

    /// Looks up the entry for the given key. Returns a copy of the entry so a concurrent write
    /// cannot change it under the caller; the key has been verified to match.
    pub fn probe(&self, key: Zobrist) -> Option<Entry> {
        let cluster = self.cluster(key);
        for index in 0..CLUSTER_SIZE {
            let entry = unsafe { *cluster.add(index) };
            if entry.key() == key && entry.key() != 0 {
                return Some(entry);
            }
        }
        None
    }

    /// Stores an entry for the given key. The replacement slot is the one already holding this
    /// key if any, otherwise the slot that is least valuable to keep: older generations first,
    /// then lower depths.
    pub fn store(
        &self,
        key: Zobrist,
        mv: Option<Move>,
        entry_type: EntryType,
        depth: Depth,
        ply: u16,
        eval: Eval,
    ) {
        debug_assert!(key != 0, "Cannot store an entry with a zero key");

        let generation = self.generation();
        let cluster = self.cluster(key);

        let mut replace_index = 0;
        let mut replace_score = i32::MAX;
        for index in 0..CLUSTER_SIZE {
            let entry = unsafe { *cluster.add(index) };

            if entry.key() == key || entry.key() == 0 {
                replace_index = index;
                break;
            }

            // Rank the slot by how much it is worth keeping.
            let age_bonus = if entry.generation() == generation { 1 << 16 } else { 0 };
            let score = age_bonus + entry.depth() as i32;
            if score < replace_score {
                replace_score = score;
                replace_index = index;
            }
        }

        let depth = depth.as_plies().max(0) as u16;
        let entry = Entry::new(key, mv, generation, entry_type, depth, ply, eval);
        unsafe { *cluster.add(replace_index) = entry };
    }

    /// Increments the generation counter, wrapping into its 9-bit storage. Called at the start
    /// of every search.
    pub fn new_search(&self) {
        let generation = self.generation.load(Ordering::Acquire);
        self.generation.store((generation + 1) & GENERATION_MASK, Ordering::Release);
    }

    /// Returns the current generation of the table.
    ///
    /// There is a synchronization cost to this read, so search threads should read it once per
    /// search and cache the value.
    pub fn generation(&self) -> Generation {
        self.generation.load(Ordering::Acquire)
    }

    /// Walks a principal variation from the given position, storing an exact entry for each ply
    /// so the next iteration finds its best moves even if they were overwritten.
    pub fn insert_pv(&self, position: &Position, pv: &[Move], eval: Eval, depth: Depth) {
        let mut position = position.clone();
        for (ply, mv) in pv.iter().enumerate() {
            if !position.is_pseudo_legal(*mv) || !position.is_legal(*mv) {
                break;
            }
            self.store(position.hash(), Some(*mv), EntryType::Exact, depth, ply as u16, eval);
            position.make(*mv);
        }
    }

    /// Estimates the fraction of the table holding entries of the current generation, sampling
    /// at most a thousand entries. Reported to the GUI as `hashfull`.
    pub fn hashfull(&self) -> u16 {
        let generation = self.generation();
        let sample = min(self.table.len(), 250);
        let mut used = 0;
        for cluster_index in 0..sample {
            let cluster = self.table[cluster_index].get() as *mut Entry;
            for index in 0..CLUSTER_SIZE {
                let entry = unsafe { *cluster.add(index) };
                if entry.key() != 0 && entry.generation() == generation {
                    used += 1;
                }
            }
        }
        (used * 1000 / (sample * CLUSTER_SIZE)) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{coordinates::Square, piece::Piece};
    use ctor::ctor;

    #[ctor]
    fn setup() {
        crate::initialize();
    }

    fn sample_move() -> Move {
        Move::new_capture(Square::E4, Square::D5, Piece::WHITE_PAWN, Piece::BLACK_PAWN)
    }

    #[test]
    fn test_entry_size() {
        assert_eq!(std::mem::size_of::<Entry>(), 16);
    }

    #[test]
    fn test_data_fields_fill_the_word() {
        let total = Entry::MOVE_SIZE
            + Entry::GENERATION_SIZE
            + Entry::ENTRY_TYPE_SIZE
            + Entry::DEPTH_SIZE
            + Entry::EVAL_SIZE;
        assert_eq!(total, 64);
    }

    #[test]
    fn test_store_and_probe_round_trip() {
        let table = TranspositionTable::new(1);
        let key: Zobrist = 0xDEADBEEF;

        table.store(key, Some(sample_move()), EntryType::Exact, Depth::from_plies(8), 4, Eval::new(42));

        let entry = table.probe(key).expect("The entry was just stored");
        assert_eq!(entry.key(), key);
        assert_eq!(entry.mv(), Some(sample_move()));
        assert_eq!(entry.entry_type(), EntryType::Exact);
        assert_eq!(entry.depth(), 8);
        assert_eq!(entry.get_eval(4), Eval::new(42));

        assert!(table.probe(key ^ 1).is_none());
    }

    #[test]
    fn test_mate_scores_are_ply_adjusted() {
        let table = TranspositionTable::new(1);
        let key: Zobrist = 0x1234;

        // A mate found 6 plies from the root, stored at ply 4.
        table.store(key, None, EntryType::Exact, Depth::from_plies(3), 4, Eval::new_mate(6));

        // Read back at a different ply: still mate in two more plies from there.
        let entry = table.probe(key).unwrap();
        assert_eq!(entry.get_eval(10), Eval::new_mate(12));
        assert_eq!(entry.get_eval(4), Eval::new_mate(6));
    }

    #[test]
    fn test_generation_wraps_into_nine_bits() {
        let table = TranspositionTable::new(1);
        for _ in 0..512 {
            table.new_search();
        }
        assert_eq!(table.generation(), 0);
        table.new_search();
        assert_eq!(table.generation(), 1);
    }

    #[test]
    fn test_replacement_prefers_old_shallow_entries() {
        let table = TranspositionTable::new(1);

        // Fill one cluster with deep, current-generation entries for distinct keys that share
        // their low bits.
        let collision = |index: u64| 0x42 + (index << 40);
        for index in 0..CLUSTER_SIZE as u64 {
            table.store(collision(index), None, EntryType::Exact, Depth::from_plies(10), 0, Eval::ZERO);
        }

        // A new store for a fifth key must evict one of them and be retrievable afterwards.
        let extra_key = collision(CLUSTER_SIZE as u64);
        table.store(extra_key, None, EntryType::Exact, Depth::from_plies(2), 0, Eval::ZERO);
        assert!(table.probe(extra_key).is_some());
    }

    #[test]
    fn test_clear_removes_entries() {
        let table = TranspositionTable::new(1);
        table.store(0x99, None, EntryType::Exact, Depth::from_plies(5), 0, Eval::ZERO);
        assert!(table.probe(0x99).is_some());

        table.clear();
        assert!(table.probe(0x99).is_none());
    }

    #[test]
    fn test_insert_pv_stores_every_ply() {
        let table = TranspositionTable::new(1);
        let position = Position::new();
        let first = crate::notation::parse_coordinate_notation(&position, "e2e4").unwrap();

        let mut after = position.clone();
        after.make(first);
        let second = crate::notation::parse_coordinate_notation(&after, "e7e5").unwrap();

        table.insert_pv(&position, &[first, second], Eval::new(20), Depth::from_plies(6));

        assert_eq!(table.probe(position.hash()).unwrap().mv(), Some(first));
        assert_eq!(table.probe(after.hash()).unwrap().mv(), Some(second));
    }
}
