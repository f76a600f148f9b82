//! Upload request — the `X-*` headers plus the file part of one POST.

use std::path::PathBuf;

use axum::body::Bytes;
use axum::http::HeaderMap;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::error::IngestError;

pub const HEADER_ORG: &str = "X-Org";
pub const HEADER_APP: &str = "X-App";
pub const HEADER_VERSION: &str = "X-Version";
pub const HEADER_BRANCH: &str = "X-Branch";
pub const HEADER_BUILD_NUMBER: &str = "X-Build-Number";
pub const HEADER_CONTENT_TYPE: &str = "X-Content-Type";

/// Declared content type that routes an upload through transcode + index.
pub const JUNIT_CONTENT_TYPE: &str = "text/vnd.junit-xml";

/// Multipart field carrying the report file.
pub const UPLOAD_FIELD: &str = "upload";

/// Everything but RFC 3986 unreserved characters is escaped in a URL segment.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Identity of a stored artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub org: String,
    pub app: String,
    pub version: String,
    pub filename: String,
}

impl ArtifactKey {
    /// Path of the artifact relative to the store root.
    pub fn relative_path(&self) -> PathBuf {
        [&self.org, &self.app, &self.version, &self.filename]
            .iter()
            .collect()
    }

    /// `org/app/version/filename` with each segment percent-encoded, used to
    /// build public URLs.
    pub fn url_path(&self) -> String {
        [&self.org, &self.app, &self.version, &self.filename]
            .iter()
            .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl std::fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.org, self.app, self.version, self.filename
        )
    }
}

/// Build coordinates supplied by the uploader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadMeta {
    pub org: String,
    pub app: String,
    pub version: String,
    pub branch: String,
    pub build_number: String,
    pub content_type: Option<String>,
}

impl UploadMeta {
    /// Read and validate the upload headers, failing on the first bad one.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, IngestError> {
        let header = |name: &'static str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .unwrap_or_default()
                .to_string()
        };

        let meta = Self {
            org: header(HEADER_ORG),
            app: header(HEADER_APP),
            version: header(HEADER_VERSION),
            branch: header(HEADER_BRANCH),
            build_number: header(HEADER_BUILD_NUMBER),
            content_type: Some(header(HEADER_CONTENT_TYPE)).filter(|v| !v.is_empty()),
        };
        meta.validate()?;
        Ok(meta)
    }

    /// Every coordinate must be present; the ones that become directory
    /// names must also be a single, ordinary path segment.
    pub fn validate(&self) -> Result<(), IngestError> {
        let fields = [
            (HEADER_ORG, &self.org, true),
            (HEADER_APP, &self.app, true),
            (HEADER_VERSION, &self.version, true),
            (HEADER_BRANCH, &self.branch, false),
            (HEADER_BUILD_NUMBER, &self.build_number, false),
        ];
        for (name, value, is_path_segment) in fields {
            if value.is_empty() {
                return Err(IngestError::MissingField(name));
            }
            if is_path_segment && !is_safe_segment(value) {
                return Err(IngestError::InvalidField(name));
            }
        }
        Ok(())
    }

    pub fn is_junit_xml(&self) -> bool {
        self.content_type.as_deref() == Some(JUNIT_CONTENT_TYPE)
    }
}

/// A fully received upload, ready for the ingestion pipeline.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub meta: UploadMeta,
    pub filename: String,
    pub bytes: Bytes,
}

impl UploadRequest {
    pub fn validate(&self) -> Result<(), IngestError> {
        self.meta.validate()?;
        if !is_safe_segment(&self.filename) {
            return Err(IngestError::InvalidFile(format!(
                "unusable file name {:?}",
                self.filename
            )));
        }
        Ok(())
    }

    pub fn artifact_key(&self) -> ArtifactKey {
        ArtifactKey {
            org: self.meta.org.clone(),
            app: self.meta.app.clone(),
            version: self.meta.version.clone(),
            filename: self.filename.clone(),
        }
    }
}

/// Last non-empty segment of a request path, percent-decoded.
///
/// The decoded name is still checked as a path segment by
/// [`UploadRequest::validate`], so an encoded `/` is rejected there.
pub fn filename_from_path(path: &str) -> Result<Option<String>, IngestError> {
    let Some(segment) = path.rsplit('/').next().filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    let decoded = percent_decode_str(segment)
        .decode_utf8()
        .map_err(|_| IngestError::InvalidFile(format!("file name {segment:?} is not UTF-8")))?;
    Ok(Some(decoded.into_owned()))
}

fn is_safe_segment(value: &str) -> bool {
    !value.is_empty()
        && value != "."
        && value != ".."
        && !value.contains(['/', '\\', '\0'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderName, HeaderValue};

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    fn complete() -> Vec<(&'static str, &'static str)> {
        vec![
            (HEADER_ORG, "acme"),
            (HEADER_APP, "billing"),
            (HEADER_VERSION, "1.4.0"),
            (HEADER_BRANCH, "master"),
            (HEADER_BUILD_NUMBER, "42"),
        ]
    }

    #[test]
    fn reads_all_coordinates() {
        let mut pairs = complete();
        pairs.push((HEADER_CONTENT_TYPE, JUNIT_CONTENT_TYPE));
        let meta = UploadMeta::from_headers(&headers(&pairs)).unwrap();
        assert_eq!(meta.org, "acme");
        assert_eq!(meta.build_number, "42");
        assert!(meta.is_junit_xml());
    }

    #[test]
    fn first_missing_header_is_reported() {
        let pairs: Vec<_> = complete()
            .into_iter()
            .filter(|(name, _)| *name != HEADER_ORG && *name != HEADER_BRANCH)
            .collect();
        let err = UploadMeta::from_headers(&headers(&pairs)).unwrap_err();
        assert!(matches!(err, IngestError::MissingField(HEADER_ORG)));
    }

    #[test]
    fn blank_header_counts_as_missing() {
        let mut pairs = complete();
        pairs[2] = (HEADER_VERSION, "   ");
        let err = UploadMeta::from_headers(&headers(&pairs)).unwrap_err();
        assert!(matches!(err, IngestError::MissingField(HEADER_VERSION)));
    }

    #[test]
    fn traversal_segments_are_rejected() {
        let mut pairs = complete();
        pairs[1] = (HEADER_APP, "..");
        let err = UploadMeta::from_headers(&headers(&pairs)).unwrap_err();
        assert!(matches!(err, IngestError::InvalidField(HEADER_APP)));

        let mut pairs = complete();
        pairs[0] = (HEADER_ORG, "acme/other");
        let err = UploadMeta::from_headers(&headers(&pairs)).unwrap_err();
        assert!(matches!(err, IngestError::InvalidField(HEADER_ORG)));
    }

    #[test]
    fn other_content_types_skip_indexing() {
        let mut pairs = complete();
        pairs.push((HEADER_CONTENT_TYPE, "text/html"));
        let meta = UploadMeta::from_headers(&headers(&pairs)).unwrap();
        assert!(!meta.is_junit_xml());
    }

    fn name(path: &str) -> Option<String> {
        filename_from_path(path).unwrap()
    }

    #[test]
    fn filename_is_last_path_segment() {
        assert_eq!(name("/reports/junit.xml").as_deref(), Some("junit.xml"));
        assert_eq!(name("/junit.xml").as_deref(), Some("junit.xml"));
        assert_eq!(name("/reports/"), None);
        assert_eq!(name("/"), None);
    }

    #[test]
    fn filename_is_percent_decoded() {
        assert_eq!(name("/my%20report.xml").as_deref(), Some("my report.xml"));
        assert_eq!(name("/caf%C3%A9.xml").as_deref(), Some("café.xml"));
    }

    #[test]
    fn filename_that_is_not_utf8_is_rejected() {
        assert!(matches!(
            filename_from_path("/bad%FF.xml"),
            Err(IngestError::InvalidFile(_))
        ));
    }

    fn request_named(filename: &str) -> UploadRequest {
        UploadRequest {
            meta: UploadMeta::from_headers(&headers(&complete())).unwrap(),
            filename: filename.into(),
            bytes: Bytes::new(),
        }
    }

    #[test]
    fn decoded_slash_is_rejected() {
        let filename = name("/..%2Fescape.xml").unwrap();
        assert_eq!(filename, "../escape.xml");
        assert!(matches!(
            request_named(&filename).validate(),
            Err(IngestError::InvalidFile(_))
        ));
    }

    #[test]
    fn url_path_encodes_each_segment() {
        let key = request_named("my report#1.xml").artifact_key();
        assert_eq!(key.url_path(), "acme/billing/1.4.0/my%20report%231.xml");
        assert_eq!(
            key.relative_path(),
            PathBuf::from("acme/billing/1.4.0/my report#1.xml")
        );
    }
}
