use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{MapAccess, Visitor},
    ser::SerializeMap,
};
use thiserror::Error;
use url::Url;

pub const DEFAULT_API_PORT: u16 = 3300;
pub const DEFAULT_WEB_PORT: u16 = 3000;
pub const DEFAULT_ORIGIN: &str = "http://localhost:3000";
pub const ZERO_MAC: &str = "00:00:00:00:00:00";
pub const DATA_URL_BASE64_MARKER: &str = ";base64,";
pub const MAX_SAVE_NAME_LEN: usize = 128;

pub const ENDPOINT_LOCAL_IP: &str = "local-ip";
pub const ENDPOINT_FILES: &str = "files";
pub const ENDPOINT_UPLOAD: &str = "upload";
pub const ENDPOINT_DOWNLOAD: &str = "download";
pub const ENDPOINT_DELETE: &str = "delete";
pub const DOWNLOAD_QUERY_KEY: &str = "filename";

/// Ordered filenames exactly as the server returned them.
pub type FileListing = Vec<String>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid origin {origin}: {reason}")]
    InvalidOrigin { origin: String, reason: String },
    #[error("unsupported origin scheme {0} (expected http or https)")]
    UnsupportedScheme(String),
    #[error("invalid endpoint path {path}: {reason}")]
    InvalidEndpoint { path: String, reason: String },
    #[error("upload file name must not be empty")]
    EmptyFileName,
    #[error("data URL has no base64 payload")]
    InvalidDataUrl,
    #[error("upload content is not valid base64: {0}")]
    InvalidBase64(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressFamily {
    IPv4,
    IPv6,
    Other(String),
}

impl AddressFamily {
    pub fn as_str(&self) -> &str {
        match self {
            AddressFamily::IPv4 => "IPv4",
            AddressFamily::IPv6 => "IPv6",
            AddressFamily::Other(other) => other,
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for AddressFamily {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AddressFamily {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Some servers report the family as a bare number instead of a name.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawFamily {
            Name(String),
            Number(u8),
        }

        Ok(match RawFamily::deserialize(deserializer)? {
            RawFamily::Name(name) if name == "IPv4" => AddressFamily::IPv4,
            RawFamily::Name(name) if name == "IPv6" => AddressFamily::IPv6,
            RawFamily::Name(name) => AddressFamily::Other(name),
            RawFamily::Number(4) => AddressFamily::IPv4,
            RawFamily::Number(6) => AddressFamily::IPv6,
            RawFamily::Number(other) => AddressFamily::Other(other.to_string()),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub address: String,
    #[serde(default)]
    pub netmask: String,
    pub family: AddressFamily,
    pub mac: String,
    #[serde(default)]
    pub internal: bool,
    #[serde(default)]
    pub cidr: Option<String>,
}

/// Discovery response: interface name to descriptors, in the order the
/// server wrote the keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceTable {
    entries: Vec<(String, Vec<InterfaceDescriptor>)>,
}

impl InterfaceTable {
    pub fn new(entries: Vec<(String, Vec<InterfaceDescriptor>)>) -> Self {
        Self { entries }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[InterfaceDescriptor])> {
        self.entries
            .iter()
            .map(|(name, descriptors)| (name.as_str(), descriptors.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for InterfaceTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, descriptors) in &self.entries {
            map.serialize_entry(name, descriptors)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for InterfaceTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(InterfaceTableVisitor)
    }
}

struct InterfaceTableVisitor;

impl<'de> Visitor<'de> for InterfaceTableVisitor {
    type Value = InterfaceTable;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of interface name to interface descriptors")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((name, descriptors)) =
            access.next_entry::<String, Vec<InterfaceDescriptor>>()?
        {
            entries.push((name, descriptors));
        }
        Ok(InterfaceTable { entries })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadRequest {
    pub name: String,
    pub file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteRequest {
    pub name: String,
}

/// URL prefix every endpoint path is joined onto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiBase {
    url: Url,
}

impl ApiBase {
    /// Same scheme and host as `origin`, with the port replaced by `api_port`.
    pub fn from_origin(origin: &str, api_port: u16) -> Result<Self, CoreError> {
        let mut url = parse_http_url(origin)?;
        url.set_port(Some(api_port))
            .map_err(|()| CoreError::InvalidOrigin {
                origin: origin.to_owned(),
                reason: "origin cannot carry a port".to_owned(),
            })?;
        url.set_path("/");
        url.set_query(None);
        url.set_fragment(None);
        Ok(Self { url })
    }

    /// Uses `server_url` as-is (port included); only the trailing slash is enforced.
    pub fn from_server_url(server_url: &str) -> Result<Self, CoreError> {
        let mut url = parse_http_url(server_url)?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        url.set_query(None);
        url.set_fragment(None);
        Ok(Self { url })
    }

    pub fn endpoint(&self, path: &str) -> Result<Url, CoreError> {
        self.url
            .join(path.trim_start_matches('/'))
            .map_err(|err| CoreError::InvalidEndpoint {
                path: path.to_owned(),
                reason: err.to_string(),
            })
    }

    pub fn as_url(&self) -> &Url {
        &self.url
    }

    pub fn host(&self) -> Option<&str> {
        self.url.host_str()
    }
}

impl fmt::Display for ApiBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

fn parse_http_url(raw: &str) -> Result<Url, CoreError> {
    let url = Url::parse(raw.trim()).map_err(|err| CoreError::InvalidOrigin {
        origin: raw.to_owned(),
        reason: err.to_string(),
    })?;
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(CoreError::UnsupportedScheme(scheme.to_owned()));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(CoreError::InvalidOrigin {
            origin: raw.to_owned(),
            reason: "missing host".to_owned(),
        });
    }
    Ok(url)
}

/// True when the page origin is served from `localhost`.
pub fn origin_is_local(origin: &str) -> bool {
    Url::parse(origin.trim())
        .ok()
        .and_then(|url| url.host_str().map(|host| host.eq_ignore_ascii_case("localhost")))
        .unwrap_or(false)
}

/// Address of the first interface, in server order, whose first descriptor
/// carries a real MAC.
pub fn select_server_address(table: &InterfaceTable) -> Option<String> {
    table
        .iter()
        .filter_map(|(_, descriptors)| descriptors.first())
        .find(|descriptor| !descriptor.mac.eq_ignore_ascii_case(ZERO_MAC))
        .map(|descriptor| descriptor.address.clone())
}

/// Link a phone on the LAN opens to reach the web client.
pub fn share_link(address: Option<&str>, web_port: u16) -> String {
    let host = address.unwrap_or_default();
    if host.contains(':') {
        format!("http://[{host}]:{web_port}")
    } else {
        format!("http://{host}:{web_port}")
    }
}

/// In-memory, base64 representation of a selected file awaiting submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadCandidate {
    name: String,
    content: String,
}

impl UploadCandidate {
    pub fn from_bytes(name: impl Into<String>, bytes: &[u8]) -> Result<Self, CoreError> {
        let name = validate_upload_name(name.into())?;
        Ok(Self {
            name,
            content: STANDARD.encode(bytes),
        })
    }

    /// Takes the payload after `;base64,` in a `data:` URL.
    pub fn from_data_url(name: impl Into<String>, data_url: &str) -> Result<Self, CoreError> {
        let name = validate_upload_name(name.into())?;
        let content = data_url
            .split_once(DATA_URL_BASE64_MARKER)
            .map(|(_, payload)| payload)
            .ok_or(CoreError::InvalidDataUrl)?;
        Ok(Self {
            name,
            content: content.to_owned(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn decoded(&self) -> Result<Vec<u8>, CoreError> {
        STANDARD
            .decode(&self.content)
            .map_err(|err| CoreError::InvalidBase64(err.to_string()))
    }

    pub fn to_request(&self) -> UploadRequest {
        UploadRequest {
            name: self.name.clone(),
            file: self.content.clone(),
        }
    }
}

fn validate_upload_name(name: String) -> Result<String, CoreError> {
    if name.trim().is_empty() {
        return Err(CoreError::EmptyFileName);
    }
    Ok(name)
}

/// Local save-as name for a server filename.
pub fn sanitize_file_name(name: &str) -> String {
    let trimmed = name.trim();
    let mut out = String::with_capacity(trimmed.len());
    for ch in trimmed.chars() {
        if matches!(ch, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|') || ch.is_control() {
            out.push('_');
        } else {
            out.push(ch);
        }
    }

    if out.len() > MAX_SAVE_NAME_LEN {
        let mut cut = MAX_SAVE_NAME_LEN;
        while !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
    }

    if out.is_empty() || out.chars().all(|ch| ch == '.') {
        return "download".to_owned();
    }
    out
}
