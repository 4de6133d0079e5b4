//! Model building: turns the record stream into an [`ir::Module`](crate::ir::Module).
//!
//! One [`ModuleBuilder`] listens to the whole stream. Each block kind has its
//! own handler (in the sibling files) that consumes records in order and
//! appends to the module arenas. Global initializers, aliases and block
//! addresses are recorded as forward references and patched once the module
//! block has been fully read.

mod constants;
mod forward;
mod function;
mod metadata;
mod module;
mod symtab;
mod types;
pub mod version;

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use crate::bitstream::{BlockKind, BlockListener, BlockParser, Record};
use crate::config::ParseOptions;
use crate::error::{Error, ParseError};
use crate::ir::{FunctionId, Module, TypeId};

use self::forward::ForwardRefs;
use self::function::FunctionState;
use self::types::TypeState;
use self::version::{layout_for, RecordLayout};

/// Decodes a bitcode buffer (raw or wrapped) into a module.
pub fn parse_module(bytes: &[u8], options: &ParseOptions) -> Result<Module, Error> {
    let mut parser = BlockParser::new(bytes)?;
    let mut builder = ModuleBuilder::new(options.clone());
    parser.parse(&mut builder)?;
    builder.finish()
}

/// Cursor over a record's operands with bounds-checked access.
pub(crate) struct Ops<'r> {
    record: &'r Record,
    pos: usize,
    block: &'static str,
}

impl<'r> Ops<'r> {
    pub(crate) fn new(record: &'r Record, block: &'static str) -> Self {
        Self {
            record,
            pos: 0,
            block,
        }
    }

    pub(crate) fn next(&mut self) -> Result<u64, ParseError> {
        let v = self.record.ops.get(self.pos).copied().ok_or_else(|| ParseError::InvalidRecord {
            block: self.block,
            code: self.record.code,
            detail: format!("expected operand {} but the record has {}", self.pos, self.record.ops.len()),
        })?;
        self.pos += 1;
        Ok(v)
    }

    pub(crate) fn opt(&mut self) -> Option<u64> {
        let v = self.record.ops.get(self.pos).copied();
        if v.is_some() {
            self.pos += 1;
        }
        v
    }

    pub(crate) fn code(&self) -> u32 {
        self.record.code
    }

    pub(crate) fn remaining(&self) -> usize {
        self.record.ops.len().saturating_sub(self.pos)
    }

    pub(crate) fn rest(&self) -> &'r [u64] {
        self.record.ops.get(self.pos..).unwrap_or(&[])
    }

    pub(crate) fn skip(&mut self, n: usize) {
        self.pos += n;
    }
}

pub(crate) fn invalid(block: &'static str, code: u32, detail: impl Into<String>) -> ParseError {
    ParseError::InvalidRecord {
        block,
        code,
        detail: detail.into(),
    }
}

pub(crate) struct ModuleBuilder {
    pub(crate) module: Module,
    options: ParseOptions,
    layout: Option<&'static RecordLayout>,
    pub(crate) forward: ForwardRefs,
    /// Definitions whose FUNCTION blocks have not been seen yet.
    pending_bodies: VecDeque<FunctionId>,
    declared_bodies: usize,
    pub(crate) function: Option<FunctionState>,
    pub(crate) types: TypeState,
    /// Current type of CONSTANTS records (SETTYPE).
    pub(crate) constants_type: Option<TypeId>,
    pub(crate) strtab: Option<Vec<u8>>,
    pub(crate) strtab_names: Vec<(crate::ir::Symbol, u64, u64)>,
    pub(crate) pending_metadata_name: Option<String>,
    stack: Vec<BlockKind>,
}

impl ModuleBuilder {
    pub(crate) fn new(options: ParseOptions) -> Self {
        Self {
            module: Module::new("module"),
            options,
            layout: None,
            forward: ForwardRefs::default(),
            pending_bodies: VecDeque::new(),
            declared_bodies: 0,
            function: None,
            types: TypeState::default(),
            constants_type: None,
            strtab: None,
            strtab_names: Vec::new(),
            pending_metadata_name: None,
            stack: Vec::new(),
        }
    }

    /// The record layout, selecting the default if no VERSION record has
    /// been seen.
    pub(crate) fn layout(&mut self) -> &'static RecordLayout {
        if let Some(layout) = self.layout {
            return layout;
        }
        warn!("module has no VERSION record; assuming the current record layout");
        self.select_version(None)
    }

    pub(crate) fn select_version(&mut self, record: Option<u64>) -> &'static RecordLayout {
        let version = match record.map(|v| (v, crate::ir::FormatVersion::from_record(v))) {
            Some((_, Some(version))) => version,
            Some((raw, None)) => {
                warn!(version = raw, "unrecognized module VERSION; assuming the current record layout");
                crate::ir::FormatVersion::Current
            }
            None => crate::ir::FormatVersion::Current,
        };
        let layout = layout_for(version);
        self.module.version = version;
        self.layout = Some(layout);
        layout
    }

    pub(crate) fn queue_body(&mut self, id: FunctionId) {
        self.pending_bodies.push_back(id);
        self.declared_bodies += 1;
    }

    /// Parent block of the innermost open block.
    pub(crate) fn parent(&self) -> Option<BlockKind> {
        self.stack.iter().rev().nth(1).copied()
    }

    pub(crate) fn in_function(&self) -> bool {
        self.stack.contains(&BlockKind::Function)
    }

    /// Handles a record code the block handler does not know.
    pub(crate) fn unknown_record(&self, kind: BlockKind, record: &Record) -> Result<(), Error> {
        if self.options.strict_records {
            return Err(invalid(kind.name(), record.code, "unknown record code").into());
        }
        debug!(block = kind.name(), code = record.code, "skipping unknown record");
        Ok(())
    }

    fn finish(mut self) -> Result<Module, Error> {
        if let Some(state) = self.function.take() {
            return Err(ParseError::Verification {
                function: self.function_name(state.id),
                detail: "function block was never closed".into(),
            }
            .into());
        }
        if !self.pending_bodies.is_empty() {
            debug!(missing = self.pending_bodies.len(), "function definitions without bodies");
        }
        self.apply_strtab_names();
        let forward = std::mem::take(&mut self.forward);
        forward.resolve(&mut self.module)?;
        self.check_module_constants()?;
        if self.options.verify {
            crate::verify::verify_module(&self.module)?;
        }
        info!(
            version = ?self.module.version,
            types = self.module.types.len(),
            globals = self.module.globals.len(),
            functions = self.module.functions.len(),
            constants = self.module.constants.len(),
            "module decoded"
        );
        Ok(self.module)
    }

    pub(crate) fn function_name(&self, id: FunctionId) -> String {
        self.module
            .function(id)
            .map(|f| f.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// Every operand of a module-level constant must name a module symbol.
    fn check_module_constants(&self) -> Result<(), ParseError> {
        let count = self.module.symbols.len() as u32;
        for symbol in &self.module.symbols {
            if let crate::ir::Symbol::Constant(c) = symbol {
                if let Some(constant) = self.module.constant(*c) {
                    if let Some(bad) = constant.operands().into_iter().find(|r| r.0 >= count) {
                        return Err(ParseError::ForwardReferenceUnresolved {
                            index: u64::from(bad.0),
                            holder: format!("module constant {}", c.0),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

impl BlockListener for ModuleBuilder {
    fn enter_block(&mut self, kind: BlockKind) -> Result<bool, Error> {
        let wanted = match kind {
            BlockKind::Module
            | BlockKind::Identification
            | BlockKind::Strtab
            | BlockKind::Type
            | BlockKind::Constants
            | BlockKind::Metadata
            | BlockKind::MetadataKind
            | BlockKind::ValueSymtab => true,
            BlockKind::Function => {
                let id = self.pending_bodies.pop_front().ok_or(ParseError::MissingFunctionBody {
                    declared: self.declared_bodies,
                })?;
                self.begin_function(id)?;
                true
            }
            BlockKind::Unknown(id) => {
                debug!(id, "skipping unknown block");
                false
            }
            _ => false,
        };
        if wanted {
            self.stack.push(kind);
            match kind {
                BlockKind::Type => self.types.begin(),
                BlockKind::Constants => self.constants_type = None,
                BlockKind::Metadata => self.begin_metadata(),
                _ => {}
            }
        }
        Ok(wanted)
    }

    fn record(&mut self, kind: BlockKind, record: Record) -> Result<(), Error> {
        match kind {
            BlockKind::Identification => self.identification_record(&record),
            BlockKind::Module => self.module_record(&record),
            BlockKind::Type => self.type_record(&record),
            BlockKind::Constants => self.constants_record(&record),
            BlockKind::Function => self.function_record(&record),
            BlockKind::Metadata | BlockKind::MetadataKind => self.metadata_record(kind, &record),
            BlockKind::ValueSymtab => self.symtab_record(&record),
            BlockKind::Strtab => self.strtab_record(&record),
            other => self.unknown_record(other, &record),
        }
    }

    fn exit_block(&mut self, kind: BlockKind) -> Result<(), Error> {
        match kind {
            BlockKind::Type => self.types.end()?,
            BlockKind::Function => self.end_function()?,
            _ => {}
        }
        self.stack.pop();
        Ok(())
    }
}
