//! Release archive packaging.

use std::io::{self, Read, Write};

use chrono::NaiveDate;

use crate::collaborators::ArchivePackager;
use crate::error::{PipelineError, PipelineResult};

/// `{product}_{YYYYMMDD}.tar`
pub fn archive_name(product: &str, effective_time: NaiveDate) -> String {
    format!("{product}_{}.tar", effective_time.format("%Y%m%d"))
}

/// Plain tar with normalized headers, so equal inputs give equal bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct TarPackager;

impl ArchivePackager for TarPackager {
    fn package(&self, files: &[(String, Vec<u8>)], sink: &mut dyn Write) -> PipelineResult<()> {
        let mut builder = tar::Builder::new(sink);
        for (name, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(content.len() as u64);
            header.set_mtime(0);
            header.set_uid(0);
            header.set_gid(0);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, content.as_slice())
                .map_err(|e| PipelineError::collaborator("tar packager", e))?;
        }
        builder
            .finish()
            .map_err(|e| PipelineError::collaborator("tar packager", e))?;
        Ok(())
    }
}

/// Read every regular file of a tar archive as (name, content).
pub fn unpack_entries(archive: &[u8]) -> io::Result<Vec<(String, Vec<u8>)>> {
    let mut archive = tar::Archive::new(archive);
    let mut entries = Vec::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.header().entry_type() != tar::EntryType::Regular {
            continue;
        }
        let name = entry.path()?.to_string_lossy().into_owned();
        let mut content = Vec::new();
        entry.read_to_end(&mut content)?;
        entries.push((name, content));
    }
    Ok(entries)
}
