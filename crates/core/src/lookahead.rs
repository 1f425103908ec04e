//! Lookahead buffer: a window of prebuilt fetch targets for
//! oracle-assisted experiments.
//!
//! An owning ring buffer of FTs plus three secondary indexes mapping a
//! static FT identity, an instruction pc, or a cache line address to
//! buffer positions. The secondary structures hold plain positions only,
//! never references; insert and remove update all three together with
//! the ring.

use std::collections::{HashMap, VecDeque};

use crate::common::{Addr, round_down};
use crate::ft::{Ft, FtBuildEnv, FtEndedBy, FtEvent, FtIdAlloc, FtInfoStatic};
use crate::op::OpPool;

/// Secondary index from a key to the buffer positions holding it.
#[derive(Debug)]
struct LookaheadIndex<K> {
    data: HashMap<K, VecDeque<usize>>,
}

impl<K: std::hash::Hash + Eq> LookaheadIndex<K> {
    fn new() -> Self {
        Self {
            data: HashMap::new(),
        }
    }

    fn insert(&mut self, key: K, buf_pos: usize) {
        self.data.entry(key).or_default().push_back(buf_pos);
    }

    fn erase(&mut self, key: &K, buf_pos: usize) {
        if let Some(positions) = self.data.get_mut(key) {
            if let Some(idx) = positions.iter().position(|&p| p == buf_pos) {
                let _ = positions.remove(idx);
            }
            if positions.is_empty() {
                let _ = self.data.remove(key);
            }
        }
    }

    fn get(&self, key: &K) -> Option<&VecDeque<usize>> {
        self.data.get(key)
    }

    fn iter(&self) -> impl Iterator<Item = (&K, &VecDeque<usize>)> {
        self.data.iter()
    }
}

/// Ring buffer of prebuilt fetch targets with multi-key lookup.
#[derive(Debug)]
pub struct LookaheadBuffer {
    buffer: Vec<Option<Ft>>,
    ft_info_to_buf_pos: LookaheadIndex<FtInfoStatic>,
    pc_to_buf_pos: LookaheadIndex<Addr>,
    line_addr_to_buf_pos: LookaheadIndex<Addr>,
    have_seen_exit: bool,
    rdptr: usize,
    wrptr: usize,
    count: usize,
    size: usize,
    line_bytes: u64,
    op_num: u64,
    ft_ids: FtIdAlloc,
}

impl LookaheadBuffer {
    /// Creates a buffer holding up to `size` prebuilt fetch targets.
    pub fn new(size: usize, line_bytes: u64) -> Self {
        Self {
            buffer: std::iter::repeat_with(|| None).take(size).collect(),
            ft_info_to_buf_pos: LookaheadIndex::new(),
            pc_to_buf_pos: LookaheadIndex::new(),
            line_addr_to_buf_pos: LookaheadIndex::new(),
            have_seen_exit: false,
            rdptr: 0,
            wrptr: 0,
            count: 0,
            size,
            line_bytes,
            op_num: 1,
            ft_ids: FtIdAlloc::default(),
        }
    }

    /// Number of valid fetch targets buffered.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Current read pointer position.
    pub fn rdptr(&self) -> usize {
        self.rdptr
    }

    /// Whether the end-of-program sentinel was buffered.
    pub fn have_seen_exit(&self) -> bool {
        self.have_seen_exit
    }

    fn update_search_indexes_on_insert(&mut self, buf_pos: usize, pool: &OpPool) {
        let ft = self.buffer[buf_pos].as_ref().unwrap();
        let static_info = ft.get_ft_info().static_info;
        self.ft_info_to_buf_pos.insert(static_info, buf_pos);
        for pc in ft.get_pcs(pool) {
            self.pc_to_buf_pos.insert(pc, buf_pos);
        }
        let line_addr = round_down(static_info.start, self.line_bytes);
        self.line_addr_to_buf_pos.insert(line_addr, buf_pos);
    }

    fn update_search_indexes_on_remove(&mut self, buf_pos: usize, pool: &OpPool) {
        let Some(ft) = self.buffer[buf_pos].as_ref() else {
            return;
        };
        let static_info = ft.get_ft_info().static_info;
        let pcs = ft.get_pcs(pool);
        self.ft_info_to_buf_pos.erase(&static_info, buf_pos);
        for pc in pcs {
            self.pc_to_buf_pos.erase(&pc, buf_pos);
        }
        let line_addr = round_down(static_info.start, self.line_bytes);
        self.line_addr_to_buf_pos.erase(&line_addr, buf_pos);
    }

    /// Builds one fetch target from the frontend and appends it.
    fn insert_ft(&mut self, env: &mut FtBuildEnv<'_>) {
        assert!(!self.have_seen_exit);
        let proc_id = 0;
        let mut ft = Ft::new(proc_id, 0, &mut self.ft_ids);
        let op_num = &mut self.op_num;
        let event = ft.build(env, false, false, &mut || {
            let n = *op_num;
            *op_num += 1;
            n
        });
        assert_ne!(event, FtEvent::BuildFail);
        ft.set_prebuilt(true);
        if ft.get_ft_info().dynamic_info.ended_by == FtEndedBy::AppExit {
            self.have_seen_exit = true;
        }
        self.buffer[self.wrptr] = Some(ft);
        self.update_search_indexes_on_insert(self.wrptr, env.pool);
        self.wrptr = (self.wrptr + 1) % self.size;
        self.count += 1;
    }

    /// Fills the buffer up to its capacity.
    pub fn refill(&mut self, env: &mut FtBuildEnv<'_>) {
        while self.count < self.size && !self.have_seen_exit {
            self.insert_ft(env);
        }
    }

    /// Prefills the buffer at startup.
    pub fn init(&mut self, env: &mut FtBuildEnv<'_>) {
        if self.size == 0 {
            return;
        }
        self.refill(env);
    }

    /// Pops the fetch target at the read pointer and refills behind it.
    pub fn pop_ft(&mut self, env: &mut FtBuildEnv<'_>) -> Ft {
        self.update_search_indexes_on_remove(self.rdptr, env.pool);
        let ft = self.buffer[self.rdptr].take().expect("buffer underflow");
        self.rdptr = (self.rdptr + 1) % self.size;
        self.count -= 1;
        if !self.have_seen_exit {
            self.refill(env);
        }
        ft
    }

    /// Fetch target at the read pointer.
    pub fn peek(&self) -> &Ft {
        self.buffer[self.rdptr]
            .as_ref()
            .expect("peek on an empty lookahead buffer")
    }

    /// Whether the FT at the read pointer can provide an op.
    pub fn can_fetch_op(&self) -> bool {
        self.buffer[self.rdptr]
            .as_ref()
            .is_some_and(Ft::can_fetch_op)
    }

    /// All buffered FTs matching a static identity, oldest first.
    pub fn find_fts_by_ft_info(&self, target: &FtInfoStatic) -> Vec<&Ft> {
        let mut result: Vec<&Ft> = Vec::new();
        if let Some(positions) = self.ft_info_to_buf_pos.get(target) {
            for &pos in positions {
                if let Some(ft) = self.buffer.get(pos).and_then(Option::as_ref) {
                    result.push(ft);
                }
            }
            result.sort_by_key(|ft| ft.get_ft_info().dynamic_info.id);
        }
        result
    }

    /// All buffered FTs starting at the given address.
    pub fn find_fts_by_start_addr(&self, start: Addr) -> Vec<&Ft> {
        let mut result = Vec::new();
        for (static_info, positions) in self.ft_info_to_buf_pos.iter() {
            if static_info.start != start {
                continue;
            }
            for &pos in positions {
                if let Some(ft) = self.buffer.get(pos).and_then(Option::as_ref) {
                    result.push(ft);
                }
            }
        }
        result
    }

    /// All buffered FTs containing the given pc.
    pub fn find_fts_enclosing_pc(&self, pc: Addr) -> Vec<&Ft> {
        let mut result = Vec::new();
        if let Some(positions) = self.pc_to_buf_pos.get(&pc) {
            for &pos in positions {
                if let Some(ft) = self.buffer.get(pos).and_then(Option::as_ref) {
                    result.push(ft);
                }
            }
        }
        result
    }

    /// All buffered FTs whose start falls in the given line.
    pub fn find_fts_enclosing_line_addr(&self, line_addr: Addr) -> Vec<&Ft> {
        let mut result = Vec::new();
        if let Some(positions) = self.line_addr_to_buf_pos.get(&line_addr) {
            for &pos in positions {
                if let Some(ft) = self.buffer.get(pos).and_then(Option::as_ref) {
                    result.push(ft);
                }
            }
        }
        result
    }

    /// Oldest buffered FT (by insertion order) with the given identity.
    pub fn find_oldest_ft_by_ft_info(&self, static_info: &FtInfoStatic) -> Option<&Ft> {
        let positions = self.ft_info_to_buf_pos.get(static_info)?;
        let &pos = positions.front()?;
        self.buffer.get(pos).and_then(Option::as_ref)
    }

    /// Youngest buffered FT with the given identity.
    pub fn find_youngest_ft_by_ft_info(&self, static_info: &FtInfoStatic) -> Option<&Ft> {
        self.find_fts_by_ft_info(static_info)
            .into_iter()
            .max_by_key(|ft| ft.get_ft_info().dynamic_info.id)
    }

    /// FT at a raw buffer position; used when scanning the window.
    pub fn get_ft(&self, pos: usize) -> Option<&Ft> {
        let ft = self.buffer.get(pos).and_then(Option::as_ref)?;
        assert_ne!(ft.get_ft_info().static_info.start, 0);
        Some(ft)
    }

    /// Destroys every buffered FT, releasing its ops.
    pub fn drain(&mut self, pool: &mut OpPool) {
        for slot in &mut self.buffer {
            if let Some(ft) = slot.take() {
                ft.destroy(pool);
            }
        }
        self.count = 0;
    }
}
