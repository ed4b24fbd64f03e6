//! Import key parsing
//!
//! An import key names where a plugin comes from and, optionally, what to call
//! it:
//!
//! ```text
//! github.com/acme/widget              repository, alias "widget"
//! github.com/acme/widget@v2           repository pinned to revision "v2"
//! https://gitlab.com/acme/kit/cli#dev repository subdirectory "cli", revision "dev"
//! ./bin/libwidget.so                  prebuilt binary, alias "widget"
//! ./bin/widget.so(gizmo)              prebuilt binary, alias "gizmo"
//! ```
//!
//! Parsing is pure: it never touches the filesystem.

use std::path::Path;

use crate::error::{PluginError, PluginResult};
use crate::types::{PluginDescriptor, RepositoryRef, SourceKind};

const SCHEMES: [&str; 4] = ["https://", "http://", "ssh://", "git://"];
const BINARY_EXTENSIONS: [&str; 3] = ["so", "dylib", "dll"];

/// Split a trailing `(alias)` off a key.
///
/// Returns the location and the alias, if one was given. `()` counts as no
/// alias.
pub fn parse_alias(raw: &str) -> PluginResult<(&str, Option<&str>)> {
    let key = raw.trim();

    let Some(open) = key.find('(') else {
        return Ok((key, None));
    };

    let inner = key[open + 1..]
        .strip_suffix(')')
        .filter(|inner| !inner.contains(['(', ')']))
        .ok_or_else(|| PluginError::ExpectedEndParen {
            key: raw.to_string(),
        })?;

    let location = key[..open].trim_end();
    let alias = inner.trim();
    Ok((location, (!alias.is_empty()).then_some(alias)))
}

/// Split an optional scheme off a location
fn split_scheme(location: &str) -> (Option<&'static str>, &str) {
    SCHEMES
        .iter()
        .find_map(|scheme| location.strip_prefix(scheme).map(|rest| (Some(*scheme), rest)))
        .unwrap_or((None, location))
}

/// Split an `@rev` or `#rev` marker off a location.
///
/// The marker is only recognised after the host, so `ssh://git@host/...`
/// keeps its user info. An empty revision counts as none.
pub fn split_revision(location: &str) -> (&str, Option<&str>) {
    let (scheme, rest) = split_scheme(location);
    let scheme_len = scheme.map_or(0, str::len);

    let Some(path_start) = rest.find('/') else {
        return (location, None);
    };

    match rest[path_start..].find(['@', '#']) {
        Some(offset) => {
            let marker = scheme_len + path_start + offset;
            let revision = &location[marker + 1..];
            (&location[..marker], (!revision.is_empty()).then_some(revision))
        }
        None => (location, None),
    }
}

/// Decide what kind of source a location (alias already removed) names
pub fn classify(location: &str) -> PluginResult<SourceKind> {
    if is_repository(location) {
        return Ok(SourceKind::VersionControlled);
    }

    let extension = Path::new(location).extension().and_then(|ext| ext.to_str());
    match extension {
        Some(ext) if BINARY_EXTENSIONS.contains(&ext) => Ok(SourceKind::LocalBinary),
        _ => Err(PluginError::UnsupportedKeyKind {
            key: location.to_string(),
        }),
    }
}

fn is_repository(location: &str) -> bool {
    let (without_revision, _) = split_revision(location);
    let (_, rest) = split_scheme(without_revision);
    let segments: Vec<&str> = rest.trim_end_matches('/').split('/').collect();

    if segments.len() < 3 || segments.iter().any(|segment| segment.is_empty()) {
        return false;
    }

    let host = strip_user_info(segments[0]);
    let valid_host = host.contains('.')
        && host
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric());

    let last = segments[segments.len() - 1];
    let last = last.strip_suffix(".git").unwrap_or(last);
    valid_host && Path::new(last).extension().is_none()
}

fn strip_user_info(host: &str) -> &str {
    host.rsplit_once('@').map_or(host, |(_, host)| host)
}

/// Repository coordinates and default alias of a version-controlled location
/// (revision already removed)
pub fn repository_parts(location: &str) -> PluginResult<(RepositoryRef, String)> {
    let (scheme, rest) = split_scheme(location);
    let segments: Vec<&str> = rest.trim_end_matches('/').split('/').collect();
    if segments.len() < 3 {
        return Err(PluginError::UnsupportedKeyKind {
            key: location.to_string(),
        });
    }

    let host = segments[0];
    let owner = segments[1];
    let repo = segments[2];
    let repo_name = repo.strip_suffix(".git").unwrap_or(repo);

    let url = format!("{}{}/{}/{}", scheme.unwrap_or("https://"), host, owner, repo);
    let host_path = format!("{}/{}/{}", strip_user_info(host), owner, repo_name);
    let subdirectory = (segments.len() > 3).then(|| segments[3..].join("/"));

    let last = segments[segments.len() - 1];
    let alias = last.strip_suffix(".git").unwrap_or(last).to_string();

    Ok((
        RepositoryRef {
            url,
            host_path,
            subdirectory,
        },
        alias,
    ))
}

/// Default alias of a binary: its file stem without a leading `lib`
fn binary_alias(location: &str) -> String {
    let stem = Path::new(location)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(location);

    match stem.strip_prefix("lib") {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => stem.to_string(),
    }
}

fn validate_alias(alias: &str, key: &str) -> PluginResult<()> {
    if alias.is_empty() || alias == "." || alias == ".." || alias.contains(['/', '\\']) {
        return Err(PluginError::UnsupportedKeyKind {
            key: key.to_string(),
        });
    }
    Ok(())
}

impl PluginDescriptor {
    /// Parse an import key. Binaries built from repositories are placed at
    /// `<plugin_dir>/<alias>.<platform library extension>`.
    pub fn parse(key: &str, plugin_dir: &Path, update_requested: bool) -> PluginResult<Self> {
        let (location, explicit_alias) = parse_alias(key)?;

        let descriptor = match classify(location)? {
            SourceKind::VersionControlled => {
                let (without_revision, revision) = split_revision(location);
                let (repository, default_alias) = repository_parts(without_revision)?;
                let alias = explicit_alias.map_or(default_alias, str::to_string);

                let location = match &repository.subdirectory {
                    Some(subdirectory) => format!("{}/{}", repository.url, subdirectory),
                    None => repository.url.clone(),
                };
                let binary_path =
                    plugin_dir.join(format!("{}.{}", alias, std::env::consts::DLL_EXTENSION));

                PluginDescriptor {
                    import_key: key.to_string(),
                    kind: SourceKind::VersionControlled,
                    alias,
                    location,
                    repository: Some(repository),
                    revision: revision.map(str::to_string),
                    binary_path,
                    update_requested,
                }
            }
            SourceKind::LocalBinary => {
                let alias = explicit_alias.map_or_else(|| binary_alias(location), str::to_string);

                PluginDescriptor {
                    import_key: key.to_string(),
                    kind: SourceKind::LocalBinary,
                    alias,
                    location: location.to_string(),
                    repository: None,
                    revision: None,
                    binary_path: location.into(),
                    update_requested,
                }
            }
        };

        validate_alias(&descriptor.alias, key)?;
        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn lib_name(alias: &str) -> String {
        format!("{}.{}", alias, std::env::consts::DLL_EXTENSION)
    }

    #[test]
    fn test_parse_alias() {
        assert_eq!(parse_alias("a/b.so").unwrap(), ("a/b.so", None));
        assert_eq!(parse_alias("a/b.so(x)").unwrap(), ("a/b.so", Some("x")));
        assert_eq!(parse_alias(" a/b.so ( x ) ").unwrap(), ("a/b.so", Some("x")));
        assert_eq!(parse_alias("a/b.so()").unwrap(), ("a/b.so", None));

        assert!(matches!(
            parse_alias("a/b.so(x"),
            Err(PluginError::ExpectedEndParen { .. })
        ));
        assert!(matches!(
            parse_alias("a/b.so(x(y))"),
            Err(PluginError::ExpectedEndParen { .. })
        ));
    }

    #[test]
    fn test_split_revision() {
        assert_eq!(
            split_revision("github.com/acme/widget@v2"),
            ("github.com/acme/widget", Some("v2"))
        );
        assert_eq!(
            split_revision("github.com/acme/widget#feature/fast"),
            ("github.com/acme/widget", Some("feature/fast"))
        );
        assert_eq!(
            split_revision("ssh://git@github.com/acme/widget"),
            ("ssh://git@github.com/acme/widget", None)
        );
        assert_eq!(
            split_revision("ssh://git@github.com/acme/widget@main"),
            ("ssh://git@github.com/acme/widget", Some("main"))
        );
        assert_eq!(split_revision("github.com/acme/widget@"), ("github.com/acme/widget", None));
    }

    #[test]
    fn test_classify() {
        use SourceKind::*;

        assert_eq!(classify("github.com/acme/widget").unwrap(), VersionControlled);
        assert_eq!(classify("github.com/acme/widget.git@v1").unwrap(), VersionControlled);
        assert_eq!(classify("https://git.example.org/a/b/c/d").unwrap(), VersionControlled);
        assert_eq!(classify("ssh://git@github.com/acme/widget").unwrap(), VersionControlled);

        assert_eq!(classify("./bin/widget.so").unwrap(), LocalBinary);
        assert_eq!(classify("/opt/plugins/widget.dylib").unwrap(), LocalBinary);
        assert_eq!(classify("C:/plugins/widget.dll").unwrap(), LocalBinary);
        assert_eq!(classify("github.com/acme/widget.so").unwrap(), LocalBinary);

        for unsupported in ["widget", "./bin/widget.txt", "github.com/acme", "acme/widget/x"] {
            assert!(
                matches!(classify(unsupported), Err(PluginError::UnsupportedKeyKind { .. })),
                "{} should be unsupported",
                unsupported
            );
        }
    }

    #[test]
    fn test_repository_parts() {
        let (repo, alias) = repository_parts("gitlab.com/acme/kit.git/tools/gadget").unwrap();
        assert_eq!(repo.url, "https://gitlab.com/acme/kit.git");
        assert_eq!(repo.host_path, "gitlab.com/acme/kit");
        assert_eq!(repo.subdirectory.as_deref(), Some("tools/gadget"));
        assert_eq!(alias, "gadget");

        let (repo, alias) = repository_parts("ssh://git@github.com/acme/widget.git").unwrap();
        assert_eq!(repo.url, "ssh://git@github.com/acme/widget.git");
        assert_eq!(repo.host_path, "github.com/acme/widget");
        assert_eq!(repo.subdirectory, None);
        assert_eq!(alias, "widget");
    }

    #[test]
    fn test_parse_versioned_key() {
        let dir = PathBuf::from("/srv/plugins");
        let descriptor = PluginDescriptor::parse("github.com/acme/widget@v2", &dir, false).unwrap();

        assert_eq!(descriptor.kind, SourceKind::VersionControlled);
        assert_eq!(descriptor.alias, "widget");
        assert_eq!(descriptor.location, "https://github.com/acme/widget");
        assert_eq!(descriptor.revision.as_deref(), Some("v2"));
        assert_eq!(descriptor.binary_path, dir.join(lib_name("widget")));
        assert_eq!(descriptor.import_key, "github.com/acme/widget@v2");
        assert!(!descriptor.update_requested);
    }

    #[test]
    fn test_parse_subdirectory_with_alias() {
        let dir = PathBuf::from("plugins");
        let descriptor =
            PluginDescriptor::parse("gitlab.com/acme/kit/tools/cli#dev(kit-cli)", &dir, true).unwrap();

        assert_eq!(descriptor.alias, "kit-cli");
        assert_eq!(descriptor.location, "https://gitlab.com/acme/kit/tools/cli");
        assert_eq!(descriptor.revision.as_deref(), Some("dev"));
        assert_eq!(descriptor.binary_path, dir.join(lib_name("kit-cli")));
        assert!(descriptor.update_requested);

        let repository = descriptor.repository.unwrap();
        assert_eq!(repository.url, "https://gitlab.com/acme/kit");
        assert_eq!(repository.subdirectory.as_deref(), Some("tools/cli"));
    }

    #[test]
    fn test_parse_local_binary() {
        let dir = PathBuf::from("plugins");

        let descriptor = PluginDescriptor::parse("./bin/libwidget.so", &dir, false).unwrap();
        assert_eq!(descriptor.kind, SourceKind::LocalBinary);
        assert_eq!(descriptor.alias, "widget");
        assert_eq!(descriptor.binary_path, PathBuf::from("./bin/libwidget.so"));
        assert!(descriptor.repository.is_none());

        let descriptor = PluginDescriptor::parse("./bin/lib.so", &dir, false).unwrap();
        assert_eq!(descriptor.alias, "lib");

        let descriptor = PluginDescriptor::parse("./bin/widget.so(gizmo)", &dir, false).unwrap();
        assert_eq!(descriptor.alias, "gizmo");
        assert_eq!(descriptor.location, "./bin/widget.so");
    }

    #[test]
    fn test_parse_is_deterministic() {
        let dir = PathBuf::from("/srv/plugins");
        for key in ["github.com/acme/widget@v2", "./bin/widget.so(w)", "git://host.io/a/b#c"] {
            let first = PluginDescriptor::parse(key, &dir, false).unwrap();
            let second = PluginDescriptor::parse(key, &dir, false).unwrap();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_parse_rejects_bad_keys() {
        let dir = PathBuf::from("plugins");
        assert!(matches!(
            PluginDescriptor::parse("widget.txt", &dir, false),
            Err(PluginError::UnsupportedKeyKind { .. })
        ));
        assert!(matches!(
            PluginDescriptor::parse("github.com/acme/widget(w", &dir, false),
            Err(PluginError::ExpectedEndParen { .. })
        ));
        assert!(matches!(
            PluginDescriptor::parse("github.com/acme/widget(../w)", &dir, false),
            Err(PluginError::UnsupportedKeyKind { .. })
        ));
    }
}
