//! Marker objects: attribute values encoded in zero-length object keys.
//!
//! Each kind is a pure encode/decode pair between a value and the last key
//! segment under a build prefix:
//!
//! | kind       | segment                  |
//! |------------|--------------------------|
//! | status     | `status:BUILDING`        |
//! | tags       | `tag:BETA,PUBLISHED`     |
//! | user       | `user:jdoe`              |
//! | roles      | `user-roles:ADMIN,QA`    |
//! | visibility | `visibility:false`       |
//! | deleted    | `markedAsDeleted`        |

use buildplane_core::{BuildStatus, BuildTag};
use tracing::warn;

const STATUS: &str = "status:";
const TAG: &str = "tag:";
const USER: &str = "user:";
const ROLES: &str = "user-roles:";
const VISIBILITY: &str = "visibility:";
const DELETED: &str = "markedAsDeleted";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    Status,
    Tags,
    User,
    Roles,
    Visibility,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    Status(BuildStatus),
    Tags(Vec<BuildTag>),
    User(String),
    Roles(Vec<String>),
    Visibility(bool),
    Deleted,
}

impl Marker {
    pub fn kind(&self) -> MarkerKind {
        match self {
            Marker::Status(_) => MarkerKind::Status,
            Marker::Tags(_) => MarkerKind::Tags,
            Marker::User(_) => MarkerKind::User,
            Marker::Roles(_) => MarkerKind::Roles,
            Marker::Visibility(_) => MarkerKind::Visibility,
            Marker::Deleted => MarkerKind::Deleted,
        }
    }

    /// Encode as a key segment.
    pub fn segment(&self) -> String {
        match self {
            Marker::Status(status) => format!("{STATUS}{status}"),
            Marker::Tags(tags) => {
                let joined: Vec<&str> = tags.iter().map(BuildTag::as_str).collect();
                format!("{TAG}{}", joined.join(","))
            }
            Marker::User(user) => format!("{USER}{user}"),
            Marker::Roles(roles) => format!("{ROLES}{}", roles.join(",")),
            Marker::Visibility(visible) => format!("{VISIBILITY}{visible}"),
            Marker::Deleted => DELETED.to_string(),
        }
    }

    /// Decode a key segment. Returns `None` for anything that is not a marker.
    pub fn parse(segment: &str) -> Option<Marker> {
        if segment == DELETED {
            return Some(Marker::Deleted);
        }
        // `user-roles:` must be tried before `user:`.
        if let Some(value) = segment.strip_prefix(ROLES) {
            return Some(Marker::Roles(split_list(value).map(str::to_string).collect()));
        }
        if let Some(value) = segment.strip_prefix(USER) {
            return Some(Marker::User(value.to_string()));
        }
        if let Some(value) = segment.strip_prefix(STATUS) {
            return match value.parse() {
                Ok(status) => Some(Marker::Status(status)),
                Err(e) => {
                    warn!(%segment, error = %e, "ignoring unreadable status marker");
                    None
                }
            };
        }
        if let Some(value) = segment.strip_prefix(TAG) {
            let tags = split_list(value)
                .filter_map(|tag| match tag.parse() {
                    Ok(tag) => Some(tag),
                    Err(e) => {
                        warn!(%segment, error = %e, "ignoring unknown tag");
                        None
                    }
                })
                .collect();
            return Some(Marker::Tags(tags));
        }
        if let Some(value) = segment.strip_prefix(VISIBILITY) {
            return match value {
                "true" => Some(Marker::Visibility(true)),
                "false" => Some(Marker::Visibility(false)),
                _ => {
                    warn!(%segment, "ignoring unreadable visibility marker");
                    None
                }
            };
        }
        None
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|item| !item.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_each_kind() {
        assert_eq!(Marker::Status(BuildStatus::Built).segment(), "status:BUILT");
        assert_eq!(
            Marker::Tags(vec![BuildTag::Beta, BuildTag::Published]).segment(),
            "tag:BETA,PUBLISHED"
        );
        assert_eq!(Marker::User("jdoe".into()).segment(), "user:jdoe");
        assert_eq!(
            Marker::Roles(vec!["ADMIN".into(), "QA".into()]).segment(),
            "user-roles:ADMIN,QA"
        );
        assert_eq!(Marker::Visibility(false).segment(), "visibility:false");
        assert_eq!(Marker::Deleted.segment(), "markedAsDeleted");
    }

    #[test]
    fn decodes_what_it_encodes() {
        let markers = [
            Marker::Status(BuildStatus::ReleaseCompleteWithWarnings),
            Marker::Tags(vec![BuildTag::Alpha]),
            Marker::Tags(vec![]),
            Marker::User("release-bot".into()),
            Marker::Roles(vec!["RELEASE_MANAGER".into()]),
            Marker::Visibility(true),
            Marker::Deleted,
        ];
        for marker in markers {
            assert_eq!(Marker::parse(&marker.segment()), Some(marker));
        }
    }

    #[test]
    fn roles_are_not_mistaken_for_user() {
        assert_eq!(
            Marker::parse("user-roles:QA").map(|m| m.kind()),
            Some(MarkerKind::Roles)
        );
    }

    #[test]
    fn non_markers_are_ignored() {
        assert_eq!(Marker::parse("config.json"), None);
        assert_eq!(Marker::parse("status:WHATEVER"), None);
        assert_eq!(Marker::parse("visibility:maybe"), None);
    }

    #[test]
    fn unknown_tags_are_dropped() {
        assert_eq!(
            Marker::parse("tag:PUBLISHED,SHINY"),
            Some(Marker::Tags(vec![BuildTag::Published]))
        );
    }
}
