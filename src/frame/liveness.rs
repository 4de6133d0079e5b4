//! Backward liveness over the CFG, reduced to the two dead-slot sets the
//! dispatch loop clears around each block.

use std::collections::BTreeSet;

use super::{FrameDescriptor, SlotId};
use crate::ir::{Function, Instruction};

type SlotSet = BTreeSet<SlotId>;

/// Slots cleared on entry to a block (`before`) and on leaving it (`after`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockNullers {
    /// Live out of some predecessor but dead on entry to this block.
    pub before: Vec<SlotId>,
    /// Defined or used in this block and dead past it.
    pub after: Vec<SlotId>,
}

struct BlockFacts {
    /// Slots read before being written in the block (phi reads excluded).
    gen: SlotSet,
    /// Slots written in the block, phis included.
    defs: SlotSet,
    phi_defs: SlotSet,
    /// Every slot touched by a non-phi instruction.
    touched: SlotSet,
    /// Slots read by successor phis along edges leaving this block.
    phi_uses: SlotSet,
}

/// Computes the per-block dead-slot sets of `func`.
pub fn analyze(func: &Function, frame: &FrameDescriptor) -> Vec<BlockNullers> {
    let n = func.blocks.len();
    let slot_of = |r| frame.value_slot(r);
    let mut facts: Vec<BlockFacts> = (0..n)
        .map(|_| BlockFacts {
            gen: SlotSet::new(),
            defs: SlotSet::new(),
            phi_defs: SlotSet::new(),
            touched: SlotSet::new(),
            phi_uses: SlotSet::new(),
        })
        .collect();

    // Parameters are defined on entry to block 0.
    if let Some(entry) = facts.first_mut() {
        entry.defs.extend(frame.param_slots().iter().copied());
    }

    for (b, block) in func.blocks.iter().enumerate() {
        for data in &block.instrs {
            if let Instruction::Phi { incoming } = &data.instr {
                for (value, pred) in incoming {
                    if let (Some(slot), Some(pred_facts)) = (slot_of(*value), facts.get_mut(*pred as usize)) {
                        pred_facts.phi_uses.insert(slot);
                    }
                }
                if let Some(slot) = data.value.and_then(slot_of) {
                    facts[b].defs.insert(slot);
                    facts[b].phi_defs.insert(slot);
                }
                continue;
            }
            let f = &mut facts[b];
            for operand in data.instr.operands() {
                if let Some(slot) = slot_of(operand) {
                    if !f.defs.contains(&slot) {
                        f.gen.insert(slot);
                    }
                    f.touched.insert(slot);
                }
            }
            if let Some(slot) = data.value.and_then(slot_of) {
                f.defs.insert(slot);
                f.touched.insert(slot);
            }
        }
    }

    let mut live_in = vec![SlotSet::new(); n];
    let mut live_out = vec![SlotSet::new(); n];
    let mut changed = true;
    while changed {
        changed = false;
        for b in (0..n).rev() {
            let mut out = facts[b].phi_uses.clone();
            for &s in &func.blocks[b].successors {
                if let Some(succ_in) = live_in.get(s as usize) {
                    out.extend(succ_in.iter().copied());
                }
            }
            let mut inn = facts[b].gen.clone();
            inn.extend(out.difference(&facts[b].defs).copied());
            if out != live_out[b] || inn != live_in[b] {
                live_out[b] = out;
                live_in[b] = inn;
                changed = true;
            }
        }
    }

    let preds = func.predecessors();
    (0..n)
        .map(|b| {
            let f = &facts[b];
            let mut after: SlotSet = f.touched.union(&f.defs).copied().collect();
            after.retain(|s| !live_out[b].contains(s));
            let mut before = SlotSet::new();
            for &p in &preds[b] {
                before.extend(live_out[p as usize].iter().copied());
            }
            before.retain(|s| !live_in[b].contains(s) && !f.phi_defs.contains(s));
            BlockNullers {
                before: before.into_iter().collect(),
                after: after.into_iter().collect(),
            }
        })
        .collect()
}
