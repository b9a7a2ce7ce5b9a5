//! PDF fetching.
//!
//! A fetch streams the body into a `.part` file beside the destination and
//! renames it into place only after the whole body arrived and looked like a
//! PDF. Dropping an unfinished fetch (error or cancellation) removes the
//! partial file, so the PDF directory only ever holds complete files.

use crate::error::{PaperError, Result};
use crate::models::PaperRecord;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

/// Largest PDF accepted
pub const MAX_PDF_BYTES: u64 = 50 * 1024 * 1024;

const PDF_MAGIC: &[u8] = b"%PDF";

/// Longest title stem used in a file name
const TITLE_STEM_CHARS: usize = 50;

/// Digest bytes appended to DOI names that would otherwise be ambiguous
const DOI_TAG_BYTES: usize = 6;

static PART_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// File name for a record's PDF: DOI, else PMID, else arXiv id, else title
pub fn pdf_filename(record: &PaperRecord) -> String {
    let ids = &record.identifiers;
    if let Some(doi) = &ids.doi {
        return doi_filename(doi);
    }
    if let Some(pmid) = &ids.pmid {
        return format!("PMID_{}.pdf", sanitize(pmid));
    }
    if let Some(arxiv) = &ids.arxiv_id {
        return format!("arXiv_{}.pdf", sanitize(&arxiv.replace('/', "_")));
    }
    let stem: String = sanitize(&record.title.replace(' ', "_"))
        .chars()
        .take(TITLE_STEM_CHARS)
        .collect();
    let stem = stem.trim_matches('_');
    if stem.is_empty() {
        "paper.pdf".to_string()
    } else {
        format!("{}.pdf", stem)
    }
}

/// `10.1000/xyz` → `10_1000_xyz.pdf`.
///
/// The underscore form only maps back to one DOI when the prefix is dotted
/// digits and the suffix is letters, digits and `-`. Any other DOI gets a
/// digest of the DOI before the extension (`10_1145_1_2.3f09a1c2d4e5.pdf`);
/// no plain name contains an inner dot, so the two forms never meet.
fn doi_filename(doi: &str) -> String {
    let doi = doi.trim().to_ascii_lowercase();
    let stem = sanitize(&doi.replace(['/', '.'], "_"));
    if is_plain_doi(&doi) {
        return format!("{}.pdf", stem);
    }
    let digest = Sha256::digest(doi.as_bytes());
    let tag: String = digest
        .iter()
        .take(DOI_TAG_BYTES)
        .map(|b| format!("{:02x}", b))
        .collect();
    format!("{}.{}.pdf", stem, tag)
}

fn is_plain_doi(doi: &str) -> bool {
    let Some((prefix, suffix)) = doi.split_once('/') else {
        return false;
    };
    let prefix_ok = prefix
        .split('.')
        .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()));
    let suffix_ok = !suffix.is_empty()
        && suffix
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-');
    prefix_ok && suffix_ok
}

/// Keep ASCII alphanumerics, `-` and `_`
fn sanitize(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

/// A previously downloaded file at `path` that starts with `%PDF`
pub async fn existing_pdf(path: &Path) -> Option<PathBuf> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    if !meta.is_file() {
        return None;
    }
    let mut file = tokio::fs::File::open(path).await.ok()?;
    let mut head = [0u8; 4];
    file.read_exact(&mut head).await.ok()?;
    (&head[..] == PDF_MAGIC).then(|| path.to_path_buf())
}

/// Temp file removed on drop unless committed
struct PartFile {
    path: PathBuf,
    committed: bool,
}

impl PartFile {
    fn beside(dest: &Path) -> Self {
        let n = PART_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut name = dest
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".{}.{}.part", std::process::id(), n));
        Self {
            path: dest.with_file_name(name),
            committed: false,
        }
    }

    async fn commit(mut self, dest: &Path) -> Result<()> {
        tokio::fs::rename(&self.path, dest).await?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Send `request` and store the body at `dest` if it is a PDF.
///
/// # Errors
///
/// Non-success status, a body not starting with `%PDF`, a body over
/// [`MAX_PDF_BYTES`] and transport failures are all errors. Callers treat
/// them as "not available".
pub async fn fetch_pdf(request: reqwest::RequestBuilder, dest: &Path) -> Result<u64> {
    let mut response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(PaperError::Api {
            code: status.as_u16(),
            message: format!("PDF fetch returned {}", status),
        });
    }

    if let Some(len) = response.content_length() {
        if len > MAX_PDF_BYTES {
            return Err(PaperError::Validation(format!("PDF too large: {} bytes", len)));
        }
    }
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let part = PartFile::beside(dest);
    let mut file = tokio::fs::File::create(&part.path).await?;

    let mut head: Vec<u8> = Vec::with_capacity(PDF_MAGIC.len());
    let mut written: u64 = 0;

    while let Some(chunk) = response.chunk().await? {
        written += chunk.len() as u64;
        if written > MAX_PDF_BYTES {
            return Err(PaperError::Validation(format!(
                "PDF exceeds {} bytes",
                MAX_PDF_BYTES
            )));
        }

        if head.len() < PDF_MAGIC.len() {
            let need = PDF_MAGIC.len() - head.len();
            head.extend_from_slice(&chunk[..need.min(chunk.len())]);
            if head.len() == PDF_MAGIC.len() && head != PDF_MAGIC {
                return Err(PaperError::Validation(format!(
                    "response is not a PDF (content-type '{}')",
                    content_type
                )));
            }
        }
        file.write_all(&chunk).await?;
    }

    if head != PDF_MAGIC {
        return Err(PaperError::Validation(format!(
            "response is not a PDF ({} bytes, content-type '{}')",
            written, content_type
        )));
    }

    file.flush().await?;
    file.sync_all().await?;
    drop(file);
    part.commit(dest).await?;

    debug!(path = %dest.display(), bytes = written, content_type = %content_type, "Saved PDF");
    Ok(written)
}
