//! Resource loader callback for archetype files.
//!
//! The resource layer owns paths and I/O. It picks an [`ArchetypeFormat`]
//! from the file name, hands the raw bytes to [`ArchetypeLoader::load`] and
//! marks the resource failed if that returns an error. A failed load never
//! registers anything with the [`EcsManager`].

use std::path::Path;
use std::sync::Arc;

use orrery_reflect::serialize::{read_document, DocumentFormat};
use orrery_reflect::Registry;
use serde::{Deserialize, Serialize};

use crate::archetype::Archetype;
use crate::builder::ArchetypeBuilder;
use crate::manager::EcsManager;
use crate::{ArchetypeError, LayoutConfig};

/// Encoding of an archetype file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArchetypeFormat {
    /// `.archetype`
    Json,
    /// `.archetype.bin`
    MessagePack,
}

impl ArchetypeFormat {
    /// Pick the format from a file name. `None` for anything else.
    pub fn from_extension(path: impl AsRef<Path>) -> Option<Self> {
        let name = path.as_ref().file_name()?.to_str()?;
        if name.ends_with(ArchetypeFormat::MessagePack.extension()) {
            Some(ArchetypeFormat::MessagePack)
        } else if name.ends_with(ArchetypeFormat::Json.extension()) {
            Some(ArchetypeFormat::Json)
        } else {
            None
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ArchetypeFormat::Json => ".archetype",
            ArchetypeFormat::MessagePack => ".archetype.bin",
        }
    }

    pub fn document_format(self) -> DocumentFormat {
        match self {
            ArchetypeFormat::Json => DocumentFormat::Json,
            ArchetypeFormat::MessagePack => DocumentFormat::MessagePack,
        }
    }
}

/// Parses archetype documents and registers the result.
#[derive(Debug, Clone, Default)]
pub struct ArchetypeLoader {
    config: LayoutConfig,
}

impl ArchetypeLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: LayoutConfig) -> Self {
        Self { config }
    }

    /// Parse `bytes`, finalize the archetype and add it to `manager`.
    pub fn load(
        &self,
        registry: &Registry,
        bytes: &[u8],
        format: ArchetypeFormat,
        manager: &mut EcsManager,
    ) -> Result<Arc<Archetype>, ArchetypeError> {
        match self
            .parse(registry, bytes, format)
            .and_then(|archetype| manager.add_archetype(archetype))
        {
            Ok(archetype) => {
                tracing::info!(
                    archetype = %archetype.hash(),
                    ?format,
                    stride = archetype.stride(),
                    components = archetype.component_count(),
                    "archetype loaded"
                );
                Ok(archetype)
            }
            Err(err) => {
                tracing::error!(error = %err, ?format, bytes = bytes.len(), "failed to load archetype");
                Err(err)
            }
        }
    }

    /// Parse and finalize without registering.
    pub fn parse(
        &self,
        registry: &Registry,
        bytes: &[u8],
        format: ArchetypeFormat,
    ) -> Result<Archetype, ArchetypeError> {
        let doc = read_document(format.document_format(), bytes)?;
        if !doc.is_object() {
            return Err(ArchetypeError::InvalidDocument {
                details: "archetype document must be an object".to_owned(),
            });
        }
        ArchetypeBuilder::with_config(self.config.clone()).finalize(registry, &doc)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
