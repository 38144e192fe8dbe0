//! Update-check response decoding

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use super::xml::{parse_document, XmlElement};
use super::{
    ELEMENT_ACTION, ELEMENT_ACTIONS, ELEMENT_APP, ELEMENT_DAYSTART, ELEMENT_MANIFEST,
    ELEMENT_PACKAGE, ELEMENT_PACKAGES, ELEMENT_RESPONSE, ELEMENT_UPDATECHECK, ELEMENT_URL,
    ELEMENT_URLS, STATUS_NO_UPDATE, STATUS_OK,
};
use crate::config::EngineConfig;
use crate::error::{Result, UpdateError};
use crate::models::{
    InstallAction, Manifest, ParsedResponse, ServerInfo, UpdateVerdict, VerdictCode, VerdictMap,
};
use crate::version::{InvalidVersion, ProductVersion};

/// Reason a manifest block could not be accepted
#[derive(Debug, Error)]
enum ManifestError {
    #[error("update has no <{element}> block")]
    MissingBlock { element: &'static str },

    #[error("<{element}> is missing '{attribute}'")]
    MissingAttribute { element: String, attribute: &'static str },

    #[error(transparent)]
    Version(#[from] InvalidVersion),

    #[error("package size {raw:?} is not a byte count")]
    BadSize { raw: String },

    #[error("package has no content hash")]
    MissingHash,

    #[error("bad codebase {codebase:?}: {source}")]
    BadCodebase {
        codebase: String,
        source: url::ParseError,
    },

    #[error("codebase {codebase:?} cannot take a path segment")]
    OpaqueCodebase { codebase: String },

    #[error("package name {name:?} is not a plain file name")]
    BadPackageName { name: String },

    #[error("update lists no download URLs")]
    NoUrls,

    #[error("manifest lists no install actions")]
    NoActions,
}

type ManifestResult<T> = std::result::Result<T, ManifestError>;

fn required<'a>(element: &'a XmlElement, attribute: &'static str) -> ManifestResult<&'a str> {
    element
        .attr(attribute)
        .ok_or_else(|| ManifestError::MissingAttribute {
            element: element.name.clone(),
            attribute,
        })
}

fn check_package_name(name: &str) -> ManifestResult<()> {
    let plain = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(|c: char| matches!(c, '/' | '\\' | ':'));
    if plain {
        Ok(())
    } else {
        Err(ManifestError::BadPackageName {
            name: name.to_string(),
        })
    }
}

/// Appends `name` to the codebase path, keeping its query
fn download_url(codebase: &str, name: Option<&str>) -> ManifestResult<Url> {
    let mut url = Url::parse(codebase).map_err(|source| ManifestError::BadCodebase {
        codebase: codebase.to_string(),
        source,
    })?;

    if let Some(name) = name {
        url.path_segments_mut()
            .map_err(|_| ManifestError::OpaqueCodebase {
                codebase: codebase.to_string(),
            })?
            .pop_if_empty()
            .push(name);
    }
    Ok(url)
}

fn parse_urls(updatecheck: &XmlElement, package_name: Option<&str>) -> ManifestResult<Vec<Url>> {
    let urls = updatecheck
        .child(ELEMENT_URLS)
        .ok_or(ManifestError::MissingBlock {
            element: ELEMENT_URLS,
        })?;

    let out = urls
        .children_named(ELEMENT_URL)
        .map(|url| download_url(required(url, "codebase")?, package_name))
        .collect::<ManifestResult<Vec<_>>>()?;

    if out.is_empty() {
        return Err(ManifestError::NoUrls);
    }
    Ok(out)
}

fn parse_action(action: &XmlElement) -> ManifestResult<InstallAction> {
    let kind = required(action, "event")?.to_string();
    let params = action
        .attributes
        .iter()
        .filter(|(k, _)| k.as_str() != "event")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect::<BTreeMap<_, _>>();
    Ok(InstallAction { kind, params })
}

fn parse_manifest(updatecheck: &XmlElement) -> ManifestResult<Manifest> {
    let manifest = updatecheck
        .child(ELEMENT_MANIFEST)
        .ok_or(ManifestError::MissingBlock {
            element: ELEMENT_MANIFEST,
        })?;

    let version = ProductVersion::parse(required(manifest, "version")?)?;

    let package = manifest
        .child(ELEMENT_PACKAGES)
        .and_then(|p| p.child(ELEMENT_PACKAGE))
        .ok_or(ManifestError::MissingBlock {
            element: ELEMENT_PACKAGE,
        })?;

    let raw_size = required(package, "size")?;
    let size = raw_size
        .parse::<u64>()
        .map_err(|_| ManifestError::BadSize {
            raw: raw_size.to_string(),
        })?;
    let hash = package
        .attr("hash_sha256")
        .or_else(|| package.attr("hash"))
        .filter(|h| !h.is_empty())
        .ok_or(ManifestError::MissingHash)?
        .to_string();
    let package_name = package.attr("name").map(str::to_string);
    if let Some(name) = &package_name {
        check_package_name(name)?;
    }

    let urls = parse_urls(updatecheck, package_name.as_deref())?;

    let actions = manifest
        .child(ELEMENT_ACTIONS)
        .map(|a| {
            a.children_named(ELEMENT_ACTION)
                .map(parse_action)
                .collect::<ManifestResult<Vec<_>>>()
        })
        .transpose()?
        .unwrap_or_default();
    if actions.is_empty() {
        return Err(ManifestError::NoActions);
    }

    Ok(Manifest {
        version,
        urls,
        size,
        hash,
        package_name,
        actions,
    })
}

/// Verdict for one `<app>` entry
fn app_verdict(app: &XmlElement) -> UpdateVerdict {
    let Some(status) = app.attr("status") else {
        return UpdateVerdict::error(VerdictCode::MalformedResponse, "<app> has no status");
    };
    if status != STATUS_OK {
        return UpdateVerdict::error(
            VerdictCode::ServerReported(status.to_string()),
            format!("server reported app status '{}'", status),
        );
    }

    let Some(updatecheck) = app.child(ELEMENT_UPDATECHECK) else {
        return UpdateVerdict::error(VerdictCode::MalformedResponse, "<app> has no <updatecheck>");
    };

    match updatecheck.attr("status") {
        Some(STATUS_NO_UPDATE) => UpdateVerdict::NoUpdate,
        Some(STATUS_OK) => match parse_manifest(updatecheck) {
            Ok(manifest) => UpdateVerdict::UpdateAvailable { manifest },
            Err(reason) => {
                UpdateVerdict::error(VerdictCode::MalformedResponse, reason.to_string())
            }
        },
        Some(other) => UpdateVerdict::error(
            VerdictCode::ServerReported(other.to_string()),
            format!("server reported update check status '{}'", other),
        ),
        None => UpdateVerdict::error(VerdictCode::MalformedResponse, "<updatecheck> has no status"),
    }
}

fn server_info(root: &XmlElement) -> ServerInfo {
    let elapsed_seconds = root
        .child(ELEMENT_DAYSTART)
        .and_then(|d| d.attr("elapsed_seconds"))
        .and_then(|raw| match raw.parse::<u64>() {
            Ok(secs) => Some(secs),
            Err(_) => {
                warn!("Ignoring unparsable daystart elapsed_seconds {:?}", raw);
                None
            }
        });
    ServerInfo { elapsed_seconds }
}

/// Decode a response document
pub(super) fn parse_update_response(
    config: &EngineConfig,
    document: &[u8],
    expected_ids: &BTreeSet<String>,
) -> Result<ParsedResponse> {
    let root = parse_document(document)?;

    if root.name != ELEMENT_RESPONSE {
        return Err(UpdateError::malformed(format!(
            "unexpected root element <{}>",
            root.name
        )));
    }

    let protocol = root
        .attr("protocol")
        .ok_or_else(|| UpdateError::malformed("response has no protocol attribute"))?;
    if protocol != config.protocol_version {
        return Err(UpdateError::ProtocolVersionMismatch {
            expected: config.protocol_version.clone(),
            found: protocol.to_string(),
        });
    }

    let mut verdicts = VerdictMap::new();
    for app in root.children_named(ELEMENT_APP) {
        let Some(id) = app.attr("appid") else {
            warn!("Ignoring <app> entry without appid");
            continue;
        };
        if !expected_ids.contains(id) {
            debug!("Ignoring response entry for unrequested ticket {}", id);
            continue;
        }

        let verdict = if verdicts.contains_key(id) {
            UpdateVerdict::error(
                VerdictCode::MalformedResponse,
                format!("server answered for {} more than once", id),
            )
        } else {
            app_verdict(app)
        };

        if let UpdateVerdict::Error { code, message } = &verdict {
            warn!("Ticket {} failed: {} ({})", id, message, code);
        }
        verdicts.insert(id.to_string(), verdict);
    }

    for id in expected_ids {
        verdicts.entry(id.clone()).or_insert_with(|| {
            warn!("Response has no entry for ticket {}", id);
            UpdateVerdict::error(VerdictCode::MissingInResponse, "no entry in server response")
        });
    }

    Ok(ParsedResponse {
        verdicts,
        server: server_info(&root),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const UPDATE_APP: &str = r#"
      <app appid="{B}" status="ok">
        <updatecheck status="ok">
          <urls>
            <url codebase="https://dl.example.com/b/"/>
            <url codebase="https://mirror.example.com/b/"/>
          </urls>
          <manifest version="2.0.1">
            <packages>
              <package name="b.pkg" size="1024" hash_sha256="abc123"/>
            </packages>
            <actions>
              <action event="preinstall" run="check.sh"/>
              <action event="install" run="b.pkg" arguments="--silent"/>
            </actions>
          </manifest>
        </updatecheck>
      </app>"#;

    fn response(protocol: &str, apps: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
            <response protocol="{}" server="test">
              <daystart elapsed_seconds="43200"/>
              {}
            </response>"#,
            protocol, apps
        )
    }

    fn ids(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn parse(doc: &str, expected: &[&str]) -> Result<ParsedResponse> {
        parse_update_response(&EngineConfig::default(), doc.as_bytes(), &ids(expected))
    }

    #[test]
    fn test_mixed_verdicts() {
        let apps = format!(
            r#"<app appid="{{A}}" status="ok"><updatecheck status="noupdate"/></app>
               {}
               <app appid="{{C}}" status="error-unknownApplication"/>"#,
            UPDATE_APP
        );
        let parsed = parse(&response("3.0", &apps), &["{A}", "{B}", "{C}"]).unwrap();

        assert_eq!(parsed.verdicts.len(), 3);
        assert_eq!(parsed.verdicts["{A}"], UpdateVerdict::NoUpdate);
        assert_eq!(parsed.server.elapsed_seconds, Some(43200));

        let manifest = parsed.verdicts["{B}"].manifest().unwrap();
        assert_eq!(manifest.version.as_str(), "2.0.1");
        assert_eq!(manifest.size, 1024);
        assert_eq!(manifest.hash, "abc123");
        assert_eq!(manifest.package_name.as_deref(), Some("b.pkg"));
        assert_eq!(
            manifest.urls.iter().map(Url::as_str).collect::<Vec<_>>(),
            vec!["https://dl.example.com/b/b.pkg", "https://mirror.example.com/b/b.pkg"]
        );
        assert_eq!(manifest.actions.len(), 2);
        assert_eq!(manifest.actions[0].kind, "preinstall");
        assert_eq!(manifest.actions[1].kind, "install");
        assert_eq!(manifest.actions[1].params.get("arguments").unwrap(), "--silent");
        assert!(!manifest.actions[1].params.contains_key("event"));

        match &parsed.verdicts["{C}"] {
            UpdateVerdict::Error { code, .. } => assert_eq!(
                *code,
                VerdictCode::ServerReported("error-unknownApplication".to_string())
            ),
            other => panic!("Expected server error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_identity_only_affects_that_ticket() {
        let apps = r#"<app appid="a" status="ok"><updatecheck status="noupdate"/></app>"#;
        let parsed = parse(&response("3.0", apps), &["a", "b"]).unwrap();

        assert_eq!(parsed.verdicts["a"], UpdateVerdict::NoUpdate);
        assert!(matches!(
            parsed.verdicts["b"],
            UpdateVerdict::Error { code: VerdictCode::MissingInResponse, .. }
        ));
    }

    #[test]
    fn test_unrequested_identity_ignored() {
        let apps = r#"<app appid="a" status="ok"><updatecheck status="noupdate"/></app>
                      <app appid="extra" status="ok"><updatecheck status="noupdate"/></app>"#;
        let parsed = parse(&response("3.0", apps), &["a"]).unwrap();

        assert_eq!(parsed.verdicts.len(), 1);
        assert!(!parsed.verdicts.contains_key("extra"));
    }

    #[test]
    fn test_update_without_actions_is_malformed_not_noupdate() {
        let app = UPDATE_APP
            .replace("<actions>", "<noactions>")
            .replace("</actions>", "</noactions>");
        let parsed = parse(&response("3.0", &app), &["{B}"]).unwrap();

        match &parsed.verdicts["{B}"] {
            UpdateVerdict::Error { code, message } => {
                assert_eq!(*code, VerdictCode::MalformedResponse);
                assert!(message.contains("install actions"));
            }
            other => panic!("Expected malformed verdict, got {:?}", other),
        }
    }

    #[test]
    fn test_update_without_urls_is_malformed() {
        let app = UPDATE_APP
            .replace(r#"<url codebase="https://dl.example.com/b/"/>"#, "")
            .replace(r#"<url codebase="https://mirror.example.com/b/"/>"#, "");
        let parsed = parse(&response("3.0", &app), &["{B}"]).unwrap();

        assert!(matches!(
            parsed.verdicts["{B}"],
            UpdateVerdict::Error { code: VerdictCode::MalformedResponse, .. }
        ));
    }

    #[test]
    fn test_update_with_bad_size_is_malformed() {
        let app = UPDATE_APP.replace(r#"size="1024""#, r#"size="big""#);
        let parsed = parse(&response("3.0", &app), &["{B}"]).unwrap();
        assert!(parsed.verdicts["{B}"].is_error());
    }

    #[test]
    fn test_update_without_hash_is_malformed() {
        let app = UPDATE_APP.replace(r#" hash_sha256="abc123""#, "");
        let parsed = parse(&response("3.0", &app), &["{B}"]).unwrap();

        match &parsed.verdicts["{B}"] {
            UpdateVerdict::Error { code, message } => {
                assert_eq!(*code, VerdictCode::MalformedResponse);
                assert_eq!(message, "package has no content hash");
            }
            other => panic!("Expected malformed verdict, got {:?}", other),
        }
    }

    #[test]
    fn test_plain_hash_attribute_accepted() {
        let app = UPDATE_APP.replace("hash_sha256=", "hash=");
        let parsed = parse(&response("3.0", &app), &["{B}"]).unwrap();
        assert_eq!(parsed.verdicts["{B}"].manifest().unwrap().hash, "abc123");
    }

    fn urls_for(codebase: &str, name: &str) -> UpdateVerdict {
        let app = UPDATE_APP
            .replace("https://dl.example.com/b/", &codebase.replace('&', "&amp;"))
            .replace(r#"<url codebase="https://mirror.example.com/b/"/>"#, "")
            .replace(r#"name="b.pkg""#, &format!(r#"name="{}""#, name));
        let parsed = parse(&response("3.0", &app), &["{B}"]).unwrap();
        parsed.verdicts["{B}"].clone()
    }

    fn first_url(verdict: &UpdateVerdict) -> String {
        verdict.manifest().unwrap().urls[0].to_string()
    }

    #[test]
    fn test_package_name_appended_as_path_segment() {
        let verdict = urls_for("https://dl.example.com/release/abc", "app.pkg");
        assert_eq!(first_url(&verdict), "https://dl.example.com/release/abc/app.pkg");

        let verdict = urls_for("https://dl.example.com/release/", "app.pkg");
        assert_eq!(first_url(&verdict), "https://dl.example.com/release/app.pkg");

        let verdict = urls_for("https://dl.example.com", "app v2.pkg");
        assert_eq!(first_url(&verdict), "https://dl.example.com/app%20v2.pkg");
    }

    #[test]
    fn test_codebase_query_kept() {
        let verdict = urls_for("https://dl.example.com/release/?token=xyz&mirror=2", "app.pkg");
        assert_eq!(
            first_url(&verdict),
            "https://dl.example.com/release/app.pkg?token=xyz&mirror=2"
        );
    }

    #[test]
    fn test_package_name_with_separator_is_malformed() {
        for name in ["setup:v2.exe", "../evil.pkg", "dir/app.pkg", "dir\\app.pkg", ".."] {
            match urls_for("https://dl.example.com/release/", name) {
                UpdateVerdict::Error { code, message } => {
                    assert_eq!(code, VerdictCode::MalformedResponse);
                    assert!(message.contains("package name"), "{}", message);
                }
                other => panic!("Expected malformed verdict for {:?}, got {:?}", name, other),
            }
        }
    }

    #[test]
    fn test_opaque_codebase_is_malformed() {
        let verdict = urls_for("mailto:ops@example.com", "app.pkg");
        assert!(matches!(
            verdict,
            UpdateVerdict::Error { code: VerdictCode::MalformedResponse, .. }
        ));
    }

    #[test]
    fn test_unknown_updatecheck_status_carried_through() {
        let apps =
            r#"<app appid="a" status="ok"><updatecheck status="error-osnotsupported"/></app>"#;
        let parsed = parse(&response("3.0", apps), &["a"]).unwrap();

        assert_eq!(
            parsed.verdicts["a"],
            UpdateVerdict::error(
                VerdictCode::ServerReported("error-osnotsupported".to_string()),
                "server reported update check status 'error-osnotsupported'"
            )
        );
    }

    #[test]
    fn test_duplicate_entries_reported_malformed() {
        let apps = r#"<app appid="a" status="ok"><updatecheck status="noupdate"/></app>
                      <app appid="a" status="ok"><updatecheck status="noupdate"/></app>"#;
        let parsed = parse(&response("3.0", apps), &["a"]).unwrap();
        assert!(parsed.verdicts["a"].is_error());
    }

    #[test]
    fn test_envelope_failures_fail_whole_call() {
        assert!(matches!(
            parse("<response protocol=\"3.0\">", &["a"]),
            Err(UpdateError::MalformedResponse { .. })
        ));
        assert!(matches!(
            parse(r#"<request protocol="3.0"/>"#, &["a"]),
            Err(UpdateError::MalformedResponse { .. })
        ));
        assert!(matches!(
            parse("<response/>", &["a"]),
            Err(UpdateError::MalformedResponse { .. })
        ));
        match parse(&response("2.0", ""), &["a"]) {
            Err(UpdateError::ProtocolVersionMismatch { expected, found }) => {
                assert_eq!(expected, "3.0");
                assert_eq!(found, "2.0");
            }
            other => panic!("Expected protocol mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_expectation_yields_empty_map() {
        let parsed = parse(&response("3.0", ""), &[]).unwrap();
        assert!(parsed.verdicts.is_empty());
    }
}
