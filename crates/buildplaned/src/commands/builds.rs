use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;

use buildplane_catalog::{ArtifactKind, BuildCatalog, BuildQuery, PageRequest, VisibilityFilter};
use buildplane_core::{BuildConfiguration, BuildKey, BuildStatus, BuildTag, QaConfiguration};

use crate::UploadKind;

pub struct ListOptions {
    pub visibility: VisibilityFilter,
    pub include_deleted: bool,
    pub from_year: Option<i32>,
    pub to_year: Option<i32>,
    pub page: Option<usize>,
    pub size: usize,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

pub fn list(
    catalog: &BuildCatalog,
    center: &str,
    product: &str,
    options: ListOptions,
) -> anyhow::Result<()> {
    let mut query = BuildQuery::default()
        .visibility(options.visibility)
        .years(options.from_year, options.to_year);
    if options.include_deleted {
        query = query.including_deleted();
    }
    if let Some(page) = options.page {
        query = query.paged(PageRequest::new(page, options.size));
    }

    let page = catalog.find_all(center, product, &query)?;
    for build in &page.content {
        let tags: Vec<&str> = build.tags.iter().map(BuildTag::as_str).collect();
        println!(
            "{}  {:<40} {}{}",
            build.key.build_id,
            build.status.as_str(),
            tags.join(","),
            if build.deleted { "  (deleted)" } else { "" }
        );
    }
    println!(
        "page {} of {} ({} builds)",
        page.page + 1,
        page.total_pages().max(1),
        page.total_elements
    );
    Ok(())
}

pub fn show(catalog: &BuildCatalog, key: &BuildKey) -> anyhow::Result<()> {
    let query = BuildQuery::default()
        .with_config()
        .with_qa_config()
        .with_validation_url();
    let build = catalog
        .find(key, &query)?
        .with_context(|| format!("build {key} not found"))?;
    print_json(&build)?;
    if let Some(report) = catalog.load_report(key)? {
        print_json(&report)?;
    }
    Ok(())
}

pub fn create(
    catalog: &BuildCatalog,
    center: &str,
    product: &str,
    configuration: Option<PathBuf>,
    qa: Option<PathBuf>,
) -> anyhow::Result<()> {
    let configuration: BuildConfiguration = match configuration {
        Some(path) => read_json(&path)?,
        None => BuildConfiguration::default(),
    };
    let qa: Option<QaConfiguration> = qa.as_deref().map(read_json::<QaConfiguration>).transpose()?;
    let build = catalog.create(center, product, configuration, qa)?;
    println!("{}", build.key.build_id);
    Ok(())
}

pub fn upload(
    catalog: &BuildCatalog,
    key: &BuildKey,
    kind: UploadKind,
    files: &[PathBuf],
) -> anyhow::Result<()> {
    catalog.require(key)?;
    let kind = match kind {
        UploadKind::Manifest => ArtifactKind::Manifest,
        UploadKind::Input => ArtifactKind::InputFiles,
    };
    for path in files {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("{} has no usable file name", path.display()))?;
        let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        catalog.put_file(key, kind, name, &data)?;
        println!("stored {}/{name}", kind.segment());
    }
    Ok(())
}

pub fn set_status(catalog: &BuildCatalog, key: &BuildKey, to: &str) -> anyhow::Result<()> {
    let status: BuildStatus = to.parse()?;
    let mut build = catalog.require(key)?;
    catalog.update_status(&mut build, status)?;
    println!("{key} is now {status}");
    Ok(())
}

pub fn tag(
    catalog: &BuildCatalog,
    key: &BuildKey,
    tags: &[String],
    replace: bool,
) -> anyhow::Result<()> {
    let tags = tags
        .iter()
        .map(|t| t.trim().parse::<BuildTag>())
        .collect::<Result<Vec<_>, _>>()?;
    let mut build = catalog.require(key)?;
    if replace {
        catalog.replace_tags(&mut build, &tags)?;
    } else {
        catalog.add_tags(&mut build, &tags)?;
    }
    let tags: Vec<&str> = build.tags.iter().map(BuildTag::as_str).collect();
    println!("{key} tags: {}", tags.join(","));
    Ok(())
}

pub fn visibility(catalog: &BuildCatalog, key: &BuildKey, visible: bool) -> anyhow::Result<()> {
    let mut build = catalog.require(key)?;
    catalog.update_visibility(&mut build, visible)?;
    println!("{key} visible: {visible}");
    Ok(())
}

pub fn owner(
    catalog: &BuildCatalog,
    key: &BuildKey,
    user: &str,
    roles: &[String],
) -> anyhow::Result<()> {
    let mut build = catalog.require(key)?;
    catalog.update_owner(&mut build, user, roles)?;
    println!("{key} owned by {user}");
    Ok(())
}

pub fn delete(catalog: &BuildCatalog, key: &BuildKey, hard: bool) -> anyhow::Result<()> {
    if hard {
        let erased = catalog.delete(key)?;
        println!("{key} erased ({erased} objects)");
    } else {
        let mut build = catalog.require(key)?;
        catalog.mark_deleted(&mut build)?;
        println!("{key} marked as deleted");
    }
    Ok(())
}
