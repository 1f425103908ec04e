//! Uop cache: a byte-addressable, set-associative store of decoded uop
//! lines, keyed by line start address plus the static identity of the
//! fetch target the line belongs to.
//!
//! Insertion is FT-granular: a fetch target's lines go in as a whole or
//! not at all, and evicting any line invalidates every other line of the
//! same fetch target. This keeps the cross-line chain invariant: for any
//! stored FT identity, walking from its start address through each
//! line's `offset` reaches exactly one line with `end_of_ft` set, and
//! every line on the walk is present.

use crate::common::Addr;
use crate::config::Config;
use crate::ft::{Ft, FtInfo, FtInfoStatic};
use crate::libs::cache::{CacheEntry, KeyedCache, SetIndex};
use crate::op::OpPool;
use crate::stats::UopCacheStats;

/// Full key of a uop cache line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UopCacheKey {
    /// Start address of the line.
    pub line_start: Addr,
    /// Static identity of the owning fetch target.
    pub static_info: FtInfoStatic,
}

impl SetIndex for UopCacheKey {
    fn set_index(&self, offset_bits: u32, num_sets: usize) -> usize {
        self.line_start.set_index(offset_bits, num_sets)
    }
}

/// One uop cache line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UopCacheData {
    /// Start address of the line.
    pub line_start: Addr,
    /// Whether the owning FT's first op was fetched on a wrong path.
    pub ft_first_op_off_path: bool,
    /// Uops stored in the line.
    pub n_uops: u32,
    /// Byte offset from this line's start to the next line's start;
    /// zero on the terminating line.
    pub offset: u64,
    /// Whether this line terminates its fetch target.
    pub end_of_ft: bool,
    /// Times the line served a fetch since insertion.
    pub used: u32,
    /// Whether the line holds a fake-nop placeholder.
    pub contains_fake_nop: bool,
    /// Replacement priority hint.
    pub priority: u8,
}

/// Per-core uop cache stage: the cache itself plus the per-cycle lookup
/// buffer the icache stage consumes from.
#[derive(Debug)]
pub struct UopCacheStage {
    proc_id: u32,
    enabled: bool,
    width: u32,
    assoc: usize,
    read_ports: u32,
    insert_only_onpath: bool,
    cache: KeyedCache<UopCacheKey, UopCacheData>,
    /// Lines of the FT currently being consumed by the icache stage.
    lookup_buffer: Vec<UopCacheData>,
    num_looked_up_lines: usize,
    lookups_per_cycle: u32,
}

impl UopCacheStage {
    /// Creates the uop cache stage for one core.
    pub fn new(proc_id: u32, cfg: &Config) -> Self {
        let uc = &cfg.uop_cache;
        Self {
            proc_id,
            enabled: uc.enable,
            width: uc.width as u32,
            assoc: uc.assoc,
            read_ports: uc.read_ports,
            insert_only_onpath: uc.insert_only_onpath,
            cache: KeyedCache::new(uc.lines, uc.assoc, cfg.fetch.icache_line_size, uc.repl),
            lookup_buffer: Vec::new(),
            num_looked_up_lines: 0,
            lookups_per_cycle: 0,
        }
    }

    /// Whether the uop cache is modeled at all.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Resets the per-cycle read-port accounting.
    pub fn begin_cycle(&mut self) {
        self.lookups_per_cycle = 0;
    }

    /// Whether another FT lookup fits in this cycle's read ports.
    pub fn can_lookup(&self) -> bool {
        self.lookups_per_cycle < self.read_ports
    }

    /// Looks up one line under a fetch target identity.
    pub fn lookup_line(
        &mut self,
        line_start: Addr,
        ft_info: FtInfo,
        update_repl: bool,
    ) -> Option<&mut UopCacheData> {
        if !self.enabled {
            return None;
        }
        let key = UopCacheKey {
            line_start,
            static_info: ft_info.static_info,
        };
        self.cache.access(&key, update_repl)
    }

    /// Looks up a whole fetch target, filling the lookup buffer with its
    /// chained lines.
    ///
    /// Returns whether every line of the FT hit. A miss on the first
    /// line is an ordinary miss; a missing line mid-chain violates the
    /// cross-line consistency invariant and aborts.
    pub fn lookup_ft_and_fill_lookup_buffer(
        &mut self,
        ft_info: FtInfo,
        off_path: bool,
        stats: &mut UopCacheStats,
    ) -> bool {
        if !self.enabled {
            return false;
        }
        assert!(self.lookup_buffer.is_empty());
        assert_eq!(self.num_looked_up_lines, 0);

        let mut lookup_addr = ft_info.static_info.start;
        loop {
            let first = self.lookup_buffer.is_empty();
            let proc_id = self.proc_id;
            let Some(line) = self.lookup_line(lookup_addr, ft_info, true) else {
                assert!(
                    first,
                    "proc {proc_id}: uop cache chain broken at {lookup_addr:#x}"
                );
                tracing::trace!(
                    ft_start = format_args!("{:#x}", ft_info.static_info.start),
                    "uop cache miss"
                );
                stats.ft_misses += 1;
                return false;
            };
            if !off_path {
                line.used += 1;
            }
            let line = *line;
            if first {
                tracing::trace!(
                    ft_start = format_args!("{:#x}", ft_info.static_info.start),
                    ft_length = ft_info.static_info.length,
                    "uop cache hit"
                );
            }
            assert_eq!(line.offset == 0, line.end_of_ft);
            self.lookup_buffer.push(line);
            if line.end_of_ft {
                break;
            }
            lookup_addr += line.offset;
        }

        stats.ft_hits += 1;
        self.lookups_per_cycle += 1;
        assert!(self.lookups_per_cycle <= self.read_ports);
        true
    }

    /// Consumes up to `requested` uops from the lookup buffer.
    ///
    /// If the current line holds more uops than requested it is partially
    /// consumed: the returned copy is clipped, the stored line keeps the
    /// remainder, and `end_of_ft` is suppressed on the clipped copy.
    pub fn consume_uops_from_lookup_buffer(&mut self, requested: u32) -> UopCacheData {
        let line = &mut self.lookup_buffer[self.num_looked_up_lines];
        let mut consumed = *line;
        if line.n_uops > requested {
            consumed.n_uops = requested;
            line.n_uops -= requested;
            if consumed.end_of_ft {
                consumed.end_of_ft = false;
            }
        } else {
            self.num_looked_up_lines += 1;
        }
        consumed
    }

    /// Whether the lookup buffer still holds unconsumed lines.
    pub fn lookup_buffer_has_lines(&self) -> bool {
        self.num_looked_up_lines < self.lookup_buffer.len()
    }

    /// Clears the lookup buffer once the FT is fully consumed or flushed.
    pub fn clear_lookup_buffer(&mut self) {
        self.lookup_buffer.clear();
        self.num_looked_up_lines = 0;
    }

    /// Generates the uop cache lines covering a fetch target.
    ///
    /// Walks ops in order, opening a new line at each fresh start pc and
    /// closing it at the line width, at the end of the FT, or at the end
    /// of the op list.
    pub fn generate_lines(&self, ft: &Ft, pool: &OpPool) -> Vec<UopCacheData> {
        let mut out = Vec::new();
        let ft_info = ft.get_ft_info();
        let ft_end_addr = ft.get_start_addr() + ft_info.static_info.length;

        let mut current: Option<UopCacheData> = None;
        let mut is_ft_end = false;
        for (i, &id) in ft.ops.iter().enumerate() {
            let op = &pool[id];
            let line = current.get_or_insert(UopCacheData {
                line_start: op.addr,
                ft_first_op_off_path: ft.get_first_op_off_path(),
                n_uops: 0,
                offset: 0,
                end_of_ft: false,
                used: 0,
                contains_fake_nop: ft.get_contains_fake_nop(),
                priority: 0,
            });
            line.n_uops += 1;
            assert!(line.n_uops <= self.width);

            let inst_end_addr = op.end_addr();
            is_ft_end = op.eom && inst_end_addr == ft_end_addr;
            let is_line_end = line.n_uops == self.width;

            if is_ft_end || is_line_end || i == ft.ops.len() - 1 {
                let mut done = current.take().unwrap();
                if is_ft_end {
                    done.end_of_ft = true;
                    done.offset = 0;
                } else if i + 1 < ft.ops.len() {
                    let next_line_start = pool[ft.ops[i + 1]].addr;
                    done.offset = next_line_start - done.line_start;
                    done.end_of_ft = false;
                } else {
                    done.offset = inst_end_addr - done.line_start;
                    done.end_of_ft = true;
                }
                out.push(done);
            }
        }
        assert!(current.is_none() && is_ft_end);
        out
    }

    /// FT-level insertability checks.
    ///
    /// Rejected when: the policy only admits on-path FTs and this one is
    /// off-path; an instruction produced more uops than a line holds
    /// (zero offset on a non-terminating line makes the key ambiguous);
    /// or the FT spans more lines than the associativity.
    fn ft_insertable(
        &mut self,
        lines: &[UopCacheData],
        ft_info: FtInfo,
        stats: &mut UopCacheStats,
    ) -> bool {
        if self.insert_only_onpath && ft_info.dynamic_info.first_op_off_path {
            return false;
        }

        for line in lines {
            if line.end_of_ft || line.offset != 0 {
                continue;
            }
            assert!(
                self.lookup_line(ft_info.static_info.start, ft_info, false)
                    .is_none()
            );
            stats.ft_insert_failed_inst_too_big += 1;
            return false;
        }

        if lines.len() > self.assoc {
            assert!(
                self.lookup_line(ft_info.static_info.start, ft_info, false)
                    .is_none()
            );
            stats.ft_insert_failed_ft_too_big += 1;
            return false;
        }
        true
    }

    /// Invalidates every remaining line of an evicted line's fetch
    /// target, walking the chain from the FT's start address.
    fn evict_ft(
        &mut self,
        evicted: &CacheEntry<UopCacheKey, UopCacheData>,
        stats: &mut UopCacheStats,
    ) {
        let static_info = evicted.key.static_info;
        let mut invalidate_addr = static_info.start;
        loop {
            let data = if invalidate_addr == evicted.key.line_start {
                // This is the line the replacement policy already chose.
                let key = UopCacheKey {
                    line_start: invalidate_addr,
                    static_info,
                };
                assert!(self.cache.invalidate(&key).is_none());
                evicted.data
            } else {
                let key = UopCacheKey {
                    line_start: invalidate_addr,
                    static_info,
                };
                let entry = self
                    .cache
                    .invalidate(&key)
                    .expect("uop cache FT chain must be fully present");
                entry.data
            };
            if data.used > 0 {
                stats.line_evicted_useful += 1;
            } else {
                stats.line_evicted_useless += 1;
            }
            if data.end_of_ft {
                break;
            }
            invalidate_addr += data.offset;
        }
    }

    /// Evicts until every target set has room for the lines it will
    /// receive, so the insertions themselves never need to evict (an
    /// insert-time eviction could tear a chain mid-insertion).
    fn preallocate_space(
        &mut self,
        lines: &[UopCacheData],
        ft_info: FtInfo,
        stats: &mut UopCacheStats,
    ) {
        assert!(!lines.is_empty());
        for line in lines {
            let key = UopCacheKey {
                line_start: line.line_start,
                static_info: ft_info.static_info,
            };
            let set = self.cache.set_index(&key);
            let lines_needed = lines
                .iter()
                .filter(|other| {
                    let other_key = UopCacheKey {
                        line_start: other.line_start,
                        static_info: ft_info.static_info,
                    };
                    self.cache.set_index(&other_key) == set
                })
                .count();

            let mut free_space = self.cache.free_space(&key);
            while free_space < lines_needed {
                if let Some(evicted) = self.cache.evict_one(&key) {
                    self.evict_ft(&evicted, stats);
                }
                let now_free = self.cache.free_space(&key);
                assert!(now_free > free_space);
                free_space = now_free;
            }
        }
    }

    /// Inserts a whole fetch target, or nothing.
    pub fn insert_ft(&mut self, ft: &Ft, pool: &OpPool, stats: &mut UopCacheStats) {
        if !self.enabled {
            return;
        }
        let lines = self.generate_lines(ft, pool);
        let ft_info = ft.get_ft_info();
        let off_path = ft_info.dynamic_info.first_op_off_path;

        if off_path {
            stats.ft_lines_off_path.incr(lines.len());
        } else {
            stats.ft_lines_on_path.incr(lines.len());
        }

        if !self.ft_insertable(&lines, ft_info, stats) {
            return;
        }

        let first_line = lines[0];
        let first_lookup = self
            .lookup_line(first_line.line_start, ft_info, true)
            .copied();
        let mut lines_exist = first_lookup.is_some();
        if lines_exist {
            stats.ft_short_reuse_conflicted += 1;
        } else {
            stats.ft_inserted += 1;
        }

        // A placeholder FT with fake nops is replaced wholesale so the
        // fresh copy carries valid ops.
        if let Some(first) = first_lookup {
            if first.contains_fake_nop {
                let key = UopCacheKey {
                    line_start: first_line.line_start,
                    static_info: ft_info.static_info,
                };
                if let Some(invalidated) = self.cache.invalidate(&key) {
                    self.evict_ft(&invalidated, stats);
                }
                lines_exist = self.lookup_line(first_line.line_start, ft_info, true).is_some();
            }
        }

        // Pre-allocate space for the entire FT before insertion.
        if !lines_exist {
            self.preallocate_space(&lines, ft_info, stats);
        }

        for line in &lines {
            let key = UopCacheKey {
                line_start: line.line_start,
                static_info: ft_info.static_info,
            };
            // The line can already be present when the reuse distance in
            // cycles is shorter than the insertion latency: the second
            // occurrence was looked up before the first was inserted.
            // Skip it; the lookup above refreshed replacement state.
            if self.cache.access(&key, true).is_some() {
                stats.line_short_reuse_conflicted += 1;
                continue;
            }
            if let Some(evicted) = self.cache.insert(key, *line) {
                self.evict_ft(&evicted, stats);
            }
            tracing::trace!(
                off_path,
                addr = format_args!("{:#x}", line.line_start),
                "uop cache line inserted"
            );
            stats.line_inserted += 1;
        }
    }
}
