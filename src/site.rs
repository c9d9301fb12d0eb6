//! Site configuration and configure-request validation.
//!
//! A `SiteConfig` is built once from a configure request and then shared read-only
//! (`Arc<SiteConfig>`) with the supervisor that runs it. Reconfiguring a site
//! replaces the whole value.

use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::OnceLock;

use crate::detect::{BorderStrips, IgnoreRegion, MaskPolicy, DEFAULT_SENSITIVITY};
use crate::error::MonitorError;
use crate::recording::upload::validate_storage_target;

/// Deployment-wide values applied to cameras that do not override them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SiteDefaults {
    pub sensitivity: u32,
    pub border: BorderStrips,
}

impl Default for SiteDefaults {
    fn default() -> Self {
        Self {
            sensitivity: DEFAULT_SENSITIVITY,
            border: BorderStrips::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CameraConfig {
    /// Source identifier (RTSP URL, file path, `stub://name`).
    pub source: String,
    pub mask: MaskPolicy,
    /// Minimum changed-region area, in pixels, that counts as motion.
    pub sensitivity: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SiteConfig {
    pub name: String,
    pub cameras: Vec<CameraConfig>,
    pub storage_target: Option<String>,
}

impl SiteConfig {
    pub fn camera_count(&self) -> usize {
        self.cameras.len()
    }

    /// Camera by 1-based index.
    pub fn camera(&self, index: usize) -> Result<&CameraConfig, MonitorError> {
        index
            .checked_sub(1)
            .and_then(|i| self.cameras.get(i))
            .ok_or_else(|| MonitorError::CameraNotFound {
                site: self.name.clone(),
                index,
                count: self.cameras.len(),
            })
    }
}

/// Lowercases and validates a site name. Site names become directory names.
pub fn normalize_site_name(raw: &str) -> Result<String, MonitorError> {
    static SITE_NAME_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = SITE_NAME_RE
        .get_or_init(|| regex::Regex::new(r"^[a-z0-9][a-z0-9_-]{0,63}$").expect("static regex"));

    let name = raw.trim().to_lowercase();
    if name.is_empty() {
        return Err(MonitorError::configuration("site", "site name is required"));
    }
    if !re.is_match(&name) {
        return Err(MonitorError::configuration(
            "site",
            "site name must match ^[a-z0-9][a-z0-9_-]{0,63}$",
        ));
    }
    Ok(name)
}

/// Validates a configure request body into a `SiteConfig`.
///
/// Accepted fields: `site` (aliases `site_name`, `market_name`), `cameras` (alias
/// `rtsp_links`; each entry a source string or `{source, ignore_region, sensitivity}`),
/// `ignore_region` (alias `ignore_area`), `border_mask`, `storage_target`.
pub fn parse_configure_request(
    body: &Value,
    defaults: &SiteDefaults,
) -> Result<SiteConfig, MonitorError> {
    let obj = body
        .as_object()
        .ok_or_else(|| MonitorError::configuration("body", "request body must be a JSON object"))?;

    let name = match field(obj, &["site", "site_name", "market_name"]) {
        Some(Value::String(raw)) => normalize_site_name(raw)?,
        Some(_) => return Err(MonitorError::configuration("site", "site must be a string")),
        None => return Err(MonitorError::configuration("site", "site name is required")),
    };

    let site_region = match field(obj, &["ignore_region", "ignore_area"]) {
        Some(value) => parse_region(value)?,
        None => None,
    };

    let border_mask = match field(obj, &["border_mask"]) {
        Some(Value::Bool(enabled)) => *enabled,
        Some(_) => {
            return Err(MonitorError::configuration(
                "border_mask",
                "border_mask must be a boolean",
            ))
        }
        None => true,
    };

    let storage_target = match field(obj, &["storage_target"]) {
        Some(Value::String(target)) if !target.trim().is_empty() => {
            let target = target.trim().to_string();
            validate_storage_target(&target)
                .map_err(|e| MonitorError::configuration("storage_target", e.to_string()))?;
            Some(target)
        }
        Some(Value::String(_)) => None,
        Some(_) => {
            return Err(MonitorError::configuration(
                "storage_target",
                "storage_target must be a string",
            ))
        }
        None => None,
    };

    let entries = match field(obj, &["cameras", "rtsp_links"]) {
        Some(Value::Array(entries)) if !entries.is_empty() => entries,
        Some(Value::Array(_)) | None => {
            return Err(MonitorError::configuration(
                "cameras",
                "at least one camera is required",
            ))
        }
        Some(_) => {
            return Err(MonitorError::configuration(
                "cameras",
                "cameras must be a list",
            ))
        }
    };

    let cameras = entries
        .iter()
        .enumerate()
        .map(|(i, entry)| parse_camera(i + 1, entry, site_region, border_mask, defaults))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SiteConfig {
        name,
        cameras,
        storage_target,
    })
}

fn field<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .find_map(|name| obj.get(*name))
        .filter(|value| !value.is_null())
}

fn parse_camera(
    index: usize,
    entry: &Value,
    site_region: Option<IgnoreRegion>,
    border_mask: bool,
    defaults: &SiteDefaults,
) -> Result<CameraConfig, MonitorError> {
    let (source, region, sensitivity) = match entry {
        Value::String(source) => (source.as_str(), None, None),
        Value::Object(obj) => {
            let source = match field(obj, &["source", "url", "rtsp_link"]) {
                Some(Value::String(source)) => source.as_str(),
                _ => {
                    return Err(MonitorError::configuration(
                        "cameras",
                        format!("camera {} needs a source string", index),
                    ))
                }
            };
            let region = match field(obj, &["ignore_region", "ignore_area"]) {
                Some(value) => parse_region(value)?,
                None => None,
            };
            let sensitivity = match field(obj, &["sensitivity"]) {
                Some(value) => Some(parse_sensitivity(index, value)?),
                None => None,
            };
            (source, region, sensitivity)
        }
        _ => {
            return Err(MonitorError::configuration(
                "cameras",
                format!("camera {} must be a source string or an object", index),
            ))
        }
    };

    let source = source.trim();
    if source.is_empty() {
        return Err(MonitorError::configuration(
            "cameras",
            format!("camera {} has an empty source", index),
        ));
    }

    let mask = match region.or(site_region) {
        Some(region) => MaskPolicy::Region(region),
        None if border_mask => MaskPolicy::Border(defaults.border),
        None => MaskPolicy::Disabled,
    };

    Ok(CameraConfig {
        source: source.to_string(),
        mask,
        sensitivity: sensitivity.unwrap_or(defaults.sensitivity),
    })
}

/// Parses `[x, y, width, height]`. A zero-area region means "no manual region".
fn parse_region(value: &Value) -> Result<Option<IgnoreRegion>, MonitorError> {
    let items = match value.as_array() {
        Some(items) if items.len() == 4 => items,
        _ => {
            return Err(MonitorError::configuration(
                "ignore_region",
                "ignore_region must have exactly four numbers [x, y, width, height]",
            ))
        }
    };
    let mut fields = [0u32; 4];
    for (slot, item) in fields.iter_mut().zip(items) {
        let number = item
            .as_f64()
            .filter(|n| n.is_finite() && *n >= 0.0 && *n <= u32::MAX as f64)
            .ok_or_else(|| {
                MonitorError::configuration(
                    "ignore_region",
                    "ignore_region values must be non-negative numbers",
                )
            })?;
        *slot = number.floor() as u32;
    }
    let [x, y, width, height] = fields;
    if width == 0 || height == 0 {
        return Ok(None);
    }
    Ok(Some(IgnoreRegion::new(x, y, width, height)))
}

fn parse_sensitivity(index: usize, value: &Value) -> Result<u32, MonitorError> {
    value
        .as_u64()
        .filter(|n| *n > 0 && *n <= u32::MAX as u64)
        .map(|n| n as u32)
        .ok_or_else(|| {
            MonitorError::configuration(
                "sensitivity",
                format!("camera {} sensitivity must be a positive integer", index),
            )
        })
}
