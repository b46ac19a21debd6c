//! Release readme generation.

use chrono::NaiveDate;

use buildplane_core::BuildConfiguration;

/// `Readme_en_{YYYYMMDD}.txt`
pub fn readme_name(effective_time: NaiveDate) -> String {
    format!("Readme_en_{}.txt", effective_time.format("%Y%m%d"))
}

/// Render the readme shipped in the release archive.
///
/// `files` are the archive entries, listed in the order given.
pub fn render(
    product: &str,
    configuration: &BuildConfiguration,
    effective_time: NaiveDate,
    files: &[String],
) -> String {
    let mut out = String::new();
    let header = configuration
        .readme_header
        .clone()
        .unwrap_or_else(|| format!("{product} release"));
    out.push_str(&header);
    out.push_str("\r\n\r\n");

    out.push_str(&format!("Effective time: {}\r\n", effective_time.format("%Y-%m-%d")));
    if configuration.beta_release {
        out.push_str("This is a BETA release and must not be used in production.\r\n");
    }
    if let Some(end_date) = &configuration.readme_end_date {
        out.push_str(&format!(
            "Copyright {}-{end_date}. All rights reserved.\r\n",
            effective_time.format("%Y")
        ));
    }
    if let Some(licence) = &configuration.licence_statement {
        out.push_str("\r\n");
        out.push_str(licence);
        out.push_str("\r\n");
    }

    out.push_str("\r\nFiles:\r\n");
    for file in files {
        out.push_str("  ");
        out.push_str(file);
        out.push_str("\r\n");
    }
    out
}
