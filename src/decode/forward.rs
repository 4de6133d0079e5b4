//! Deferred patch list for forward references.

use tracing::trace;

use crate::error::ParseError;
use crate::ir::{AliasId, ConstId, GlobalId, Module, ReplaceOperand, Replacement, Symbol, ValueRef};

/// A model object holding a placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Holder {
    GlobalInitializer(GlobalId),
    AliasTarget(AliasId),
    Constant(ConstId),
}

#[derive(Debug, Default)]
pub(crate) struct ForwardRefs {
    patches: Vec<(u32, Holder)>,
}

impl ForwardRefs {
    pub(crate) fn defer(&mut self, target: u32, holder: Holder) {
        self.patches.push((target, holder));
    }

    pub(crate) fn len(&self) -> usize {
        self.patches.len()
    }

    /// Replaces every placeholder with its symbol, then checks that no
    /// placeholder remains anywhere in the module.
    pub(crate) fn resolve(self, module: &mut Module) -> Result<(), ParseError> {
        trace!(patches = self.patches.len(), "resolving forward references");
        for (target, holder) in self.patches {
            let symbol = module.symbol(ValueRef(target));
            let Some(symbol) = symbol else {
                return Err(ParseError::ForwardReferenceUnresolved {
                    index: u64::from(target),
                    holder: describe(module, holder),
                });
            };
            let is_definition = match symbol {
                Symbol::Function(f) => module.function(f).map(|f| f.is_definition()).unwrap_or(false),
                _ => false,
            };
            let replacement = Replacement {
                symbol,
                is_definition,
            };
            match holder_mut(module, holder) {
                Some(h) => h.replace(target, replacement)?,
                None => {
                    return Err(ParseError::ForwardReferenceUnresolved {
                        index: u64::from(target),
                        holder: format!("{:?}", holder),
                    })
                }
            }
        }
        ensure_none_pending(module)
    }
}

fn holder_mut(module: &mut Module, holder: Holder) -> Option<&mut dyn ReplaceOperand> {
    match holder {
        Holder::GlobalInitializer(g) => module
            .globals
            .get_mut(g.0 as usize)
            .map(|g| g as &mut dyn ReplaceOperand),
        Holder::AliasTarget(a) => module
            .aliases
            .get_mut(a.0 as usize)
            .map(|a| a as &mut dyn ReplaceOperand),
        Holder::Constant(c) => module
            .constants
            .get_mut(c.0 as usize)
            .map(|c| c as &mut dyn ReplaceOperand),
    }
}

fn describe(module: &Module, holder: Holder) -> String {
    match holder {
        Holder::GlobalInitializer(g) => module.globals.get(g.0 as usize).map(|g| g.describe()),
        Holder::AliasTarget(a) => module.aliases.get(a.0 as usize).map(|a| a.describe()),
        Holder::Constant(c) => module.constants.get(c.0 as usize).map(|c| c.describe()),
    }
    .unwrap_or_else(|| format!("{:?}", holder))
}

fn ensure_none_pending(module: &Module) -> Result<(), ParseError> {
    let holders = module
        .globals
        .iter()
        .map(|g| g as &dyn ReplaceOperand)
        .chain(module.aliases.iter().map(|a| a as &dyn ReplaceOperand))
        .chain(module.constants.iter().map(|c| c as &dyn ReplaceOperand));
    for holder in holders {
        if let Some(index) = holder.pending().first() {
            return Err(ParseError::ForwardReferenceUnresolved {
                index: u64::from(*index),
                holder: holder.describe(),
            });
        }
    }
    Ok(())
}
