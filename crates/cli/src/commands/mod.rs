//! Command implementations.

mod info;
mod run;
mod validate;

pub use info::run_info;
pub use run::run_pipeline;
pub use validate::run_validate;

use contracts::SourceKind;

/// Short description of a source kind
fn source_kind(kind: &SourceKind) -> String {
    match kind {
        SourceKind::Synthetic(s) => format!("synthetic, {} frames {}x{}", s.frames, s.width, s.height),
        SourceKind::Raw(r) => format!("raw, {} files {}x{}", r.files.len(), r.width, r.height),
    }
}
