//! Instruction stream sources.
//!
//! The core pulls ops from a [`Frontend`]: an oracle stream that knows the
//! architecturally correct outcome of every instruction. Two sources are
//! provided: a scripted replay frontend for tests and a synthetic kernel
//! frontend for self-contained runs. Both synthesize a wrong-path stream
//! after a redirect and resume the correct path after a recovery.

/// Scripted instruction replay.
pub mod replay;
/// Synthetic kernel generators.
pub mod synthetic;

pub use replay::VecFrontend;
pub use synthetic::SyntheticFrontend;

use crate::common::Addr;
use crate::op::{CfType, Op};

/// Oracle description of one instruction, as the frontend yields it.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstDesc {
    /// Frontend-assigned instruction id.
    pub inst_uid: u64,
    /// Instruction address.
    pub addr: Addr,
    /// Instruction size in bytes.
    pub size: u64,
    /// Architecturally correct next pc.
    pub npc: Addr,
    /// Control-flow classification.
    pub cf_type: CfType,
    /// Architecturally correct direction.
    pub dir: bool,
    /// Architecturally correct target.
    pub target: Addr,
    /// Serializing fetch barrier.
    pub bar_fetch: bool,
    /// Program-termination sentinel.
    pub exit: bool,
}

impl InstDesc {
    /// Plain non-cf instruction falling through to `addr + size`.
    pub fn alu(inst_uid: u64, addr: Addr, size: u64) -> Self {
        Self {
            inst_uid,
            addr,
            size,
            npc: addr + size,
            ..Self::default()
        }
    }

    /// Conditional branch with the given oracle direction.
    pub fn cbr(inst_uid: u64, addr: Addr, size: u64, target: Addr, taken: bool) -> Self {
        Self {
            inst_uid,
            addr,
            size,
            npc: if taken { target } else { addr + size },
            cf_type: CfType::Cbr,
            dir: taken,
            target,
            ..Self::default()
        }
    }

    /// Direct call.
    pub fn call(inst_uid: u64, addr: Addr, size: u64, target: Addr) -> Self {
        Self {
            inst_uid,
            addr,
            size,
            npc: target,
            cf_type: CfType::Call,
            dir: true,
            target,
            ..Self::default()
        }
    }

    /// Return to `target`.
    pub fn ret(inst_uid: u64, addr: Addr, size: u64, target: Addr) -> Self {
        Self {
            inst_uid,
            addr,
            size,
            npc: target,
            cf_type: CfType::Ret,
            dir: true,
            target,
            ..Self::default()
        }
    }

    /// Indirect branch to `target`.
    pub fn ibr(inst_uid: u64, addr: Addr, size: u64, target: Addr) -> Self {
        Self {
            inst_uid,
            addr,
            size,
            npc: target,
            cf_type: CfType::Ibr,
            dir: true,
            target,
            ..Self::default()
        }
    }

    /// Unconditional direct branch to `target`.
    pub fn br(inst_uid: u64, addr: Addr, size: u64, target: Addr) -> Self {
        Self {
            inst_uid,
            addr,
            size,
            npc: target,
            cf_type: CfType::Br,
            dir: true,
            target,
            ..Self::default()
        }
    }

    /// System call falling through after the kernel returns.
    pub fn sys(inst_uid: u64, addr: Addr, size: u64) -> Self {
        Self {
            inst_uid,
            addr,
            size,
            npc: addr + size,
            cf_type: CfType::Sys,
            dir: true,
            target: addr + size,
            ..Self::default()
        }
    }

    /// Program-termination sentinel.
    pub fn exit_marker(inst_uid: u64, addr: Addr, size: u64) -> Self {
        Self {
            inst_uid,
            addr,
            size,
            npc: addr + size,
            exit: true,
            ..Self::default()
        }
    }

    /// Populates an op record from this descriptor.
    ///
    /// All synthesized instructions are single-uop: each op carries both
    /// the begin- and end-of-macro markers.
    pub fn fill(&self, op: &mut Op) {
        op.inst_uid = self.inst_uid;
        op.addr = self.addr;
        op.inst_size = self.size;
        op.cf_type = self.cf_type;
        op.bar_fetch = self.bar_fetch;
        op.exit = self.exit;
        op.bom = true;
        op.eom = true;
        op.oracle.npc = self.npc;
        op.oracle.dir = self.dir;
        op.oracle.target = self.target;
    }
}

/// Pull interface the core consumes its instruction stream from.
pub trait Frontend {
    /// Whether the next op is available for this predictor instance.
    fn can_fetch_op(&mut self, proc_id: u32, bp_id: u32) -> bool;

    /// Populates `op` with the next instruction's oracle state.
    fn fetch_op(&mut self, proc_id: u32, bp_id: u32, op: &mut Op);

    /// Redirects the internal fetch pointer. `fetch_addr == 0` means
    /// "stop fetching for this predictor instance".
    fn redirect(&mut self, proc_id: u32, bp_id: u32, inst_uid: u64, fetch_addr: Addr);

    /// Signals that speculation past `inst_uid` is being discarded.
    fn recover(&mut self, proc_id: u32, bp_id: u32, inst_uid: u64);

    /// Signals that the instruction has committed.
    fn retire(&mut self, proc_id: u32, inst_uid: u64);

    /// Address of the next on-path instruction.
    fn next_fetch_addr(&mut self, proc_id: u32) -> Addr;

    /// Whether this frontend executes speculatively itself and must be
    /// stalled across fetch barriers. Trace-style frontends return false.
    fn is_exec_driven(&self) -> bool {
        false
    }
}

/// Uid space for synthesized wrong-path instructions.
const OFF_PATH_UID_BASE: u64 = 1 << 48;

/// Wrong-path instruction synthesizer shared by the frontends.
///
/// After a redirect to a bogus address the real stream has nothing to
/// offer, so the frontend fabricates a plausible fall-through run with an
/// occasional not-taken conditional.
#[derive(Debug, Clone, Default)]
pub struct OffPathGen {
    /// Currently serving the wrong path.
    pub active: bool,
    /// Fetching disabled via a zero-address redirect.
    pub stopped: bool,
    next_addr: Addr,
    count: u64,
    next_uid: u64,
}

impl OffPathGen {
    /// Begins wrong-path synthesis at `addr`.
    pub fn start(&mut self, addr: Addr) {
        self.active = true;
        self.stopped = false;
        self.next_addr = addr;
        self.count = 0;
    }

    /// Stops fetching for this predictor instance.
    pub fn stop(&mut self) {
        self.active = true;
        self.stopped = true;
    }

    /// Ends wrong-path synthesis (recovery observed).
    pub fn reset(&mut self) {
        self.active = false;
        self.stopped = false;
    }

    /// Next synthesized wrong-path instruction.
    pub fn next(&mut self) -> InstDesc {
        let uid = OFF_PATH_UID_BASE + self.next_uid;
        self.next_uid += 1;
        let addr = self.next_addr;
        self.count += 1;
        self.next_addr = addr + 4;
        if self.count % 16 == 0 {
            // A not-taken conditional keeps the wrong path honest without
            // spiraling into further redirects.
            InstDesc::cbr(uid, addr, 4, addr + 64, false)
        } else {
            InstDesc::alu(uid, addr, 4)
        }
    }
}
