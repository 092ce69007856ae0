pub mod python;
pub mod types;

use crate::page_extract::PageStream;
use anyhow::Result;
use std::path::Path;

pub use types::{
    ConvertIn, ConvertMode, ConvertOut, ConvertedDocument, EngineDiag, PageItem, PictureItem,
    TableItem,
};

/// Document conversion capability.
///
/// Implementations are constructed once and reused across documents so that
/// model loading is paid up front.
pub trait Converter {
    fn doctor(&self) -> Result<EngineDiag>;

    /// Converts a whole file. An `Err` means the engine produced no document.
    fn convert(&self, input: &Path, mode: ConvertMode) -> Result<ConvertedDocument>;

    /// Converts in-memory page streams. The result is index-aligned with
    /// `streams`; `None` marks a stream the engine could not convert.
    fn convert_streams(
        &self,
        streams: &[PageStream],
        mode: ConvertMode,
    ) -> Result<Vec<Option<ConvertedDocument>>>;
}

impl<C: Converter + ?Sized> Converter for &C {
    fn doctor(&self) -> Result<EngineDiag> {
        (**self).doctor()
    }

    fn convert(&self, input: &Path, mode: ConvertMode) -> Result<ConvertedDocument> {
        (**self).convert(input, mode)
    }

    fn convert_streams(
        &self,
        streams: &[PageStream],
        mode: ConvertMode,
    ) -> Result<Vec<Option<ConvertedDocument>>> {
        (**self).convert_streams(streams, mode)
    }
}
