//! Page ordering for rendered artifacts.

use crate::adapters::{PageImage, RenderError};

/// Page number embedded in an artifact name: the digits between the last `_`
/// and the extension, e.g. `mat_page_12.jpg` is page 12.
pub fn page_number(file_name: &str) -> Option<u32> {
    let stem = match file_name.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => file_name,
    };
    let (_, digits) = stem.rsplit_once('_')?;
    digits.parse().ok()
}

/// Sorts artifacts by their numeric page suffix.
pub fn order_pages(images: Vec<PageImage>) -> Result<Vec<PageImage>, RenderError> {
    let mut numbered = images
        .into_iter()
        .map(|image| match page_number(image.file_name()) {
            Some(n) => Ok((n, image)),
            None => Err(RenderError::UnnumberedArtifact(image.file_name().to_string())),
        })
        .collect::<Result<Vec<_>, _>>()?;

    numbered.sort_by_key(|(n, _)| *n);
    Ok(numbered.into_iter().map(|(_, image)| image).collect())
}
