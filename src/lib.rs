//! jarhook
//!
//! Injects a call to a static hook method at the entry of one method inside
//! a JAR, rewriting only that class and copying every other entry verbatim.
//!
//! ## Architecture
//!
//! - **archive**: walks the source archive and assembles the destination
//! - **patch**: class transformer (method matcher, instruction patcher, frame recalculation)
//! - **classfile**: classfile model, reader/writer, instruction and stack map codecs
//! - **verify**: structural checks of parsed classfiles
//! - **bin**: command-line interface
//!
//! ## Pipeline
//!
//! ```text
//! Archive Walker → Class Locator → Method Matcher → Instruction Patcher
//!                                                 → Frame Recalculator → Archive Assembler
//! ```

pub mod archive;
pub mod classfile;
pub mod config;
pub mod consts;
pub mod error;
pub mod patch;
pub mod verify;

pub use archive::{transform, ExtraEntry, JarReader, TransformReport};
pub use config::Config;
pub use error::{ArchiveError, Error, Result};
pub use patch::{transform_class, ClassTransform, PatchOutcome, PatchSpec};

/// Run a full transformation: validate the inputs, load the extra entries
/// named by `spec` from `config.hook_classes_dir` (unless disabled) and
/// rewrite `source` into `destination`.
pub fn run(source: &std::path::Path, destination: &std::path::Path, spec: &PatchSpec, config: &Config) -> Result<TransformReport> {
    spec.validate()?;
    config.validate()?;
    let extra_entries = if config.include_extra_entries {
        ExtraEntry::load_all(&config.hook_classes_dir, &spec.extra_entry_paths)?
    } else {
        Vec::new()
    };
    Ok(transform(source, destination, spec, &extra_entries, config)?)
}
