//! Geo record parsing.

use serde::Serialize;

use crate::{Error, Result};

/// Minimum number of `|`-separated fields in a record string.
pub const FIELD_COUNT: usize = 16;

/// Parsed geolocation attributes for one address range.
///
/// Field order matches the record string layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GeoRecord {
    /// 洲
    pub continent: String,
    /// 国家/地区
    pub country: String,
    /// 省份
    pub province: String,
    /// 城市
    pub city: String,
    /// 线路
    pub line: String,
    /// 运营商
    pub isp: String,
    /// 区域代码
    pub area_code: String,
    /// 国家/地区英文简写
    pub country_code: String,
    pub longitude: String,
    pub latitude: String,
    pub zip_code: String,
    pub asn: String,
    /// 运营商域名
    pub domain: String,
    pub idc: String,
    /// 基站
    pub station: String,
    pub timezone: String,
}

impl GeoRecord {
    /// Parse a pipe-delimited record string.
    ///
    /// Fields beyond the sixteenth are ignored.
    pub fn parse(raw: &str) -> Result<Self> {
        let fields: Vec<&str> = raw.split('|').collect();
        if fields.len() < FIELD_COUNT {
            return Err(Error::Format(format!(
                "wrong number of record fields: {}, at least {}, but got: {}",
                fields.len(),
                FIELD_COUNT,
                raw
            )));
        }
        let f = |i: usize| fields[i].to_string();
        Ok(Self {
            continent: f(0),
            country: f(1),
            province: f(2),
            city: f(3),
            line: f(4),
            isp: f(5),
            area_code: f(6),
            country_code: f(7),
            longitude: f(8),
            latitude: f(9),
            zip_code: f(10),
            asn: f(11),
            domain: f(12),
            idc: f(13),
            station: f(14),
            timezone: f(15),
        })
    }

    /// Two-letter continent code, or the raw continent name when unknown.
    pub fn continent_code(&self) -> &str {
        continent_code(&self.continent)
    }

    /// Fields in record-string order.
    pub fn fields(&self) -> [&str; FIELD_COUNT] {
        [
            self.continent.as_str(),
            self.country.as_str(),
            self.province.as_str(),
            self.city.as_str(),
            self.line.as_str(),
            self.isp.as_str(),
            self.area_code.as_str(),
            self.country_code.as_str(),
            self.longitude.as_str(),
            self.latitude.as_str(),
            self.zip_code.as_str(),
            self.asn.as_str(),
            self.domain.as_str(),
            self.idc.as_str(),
            self.station.as_str(),
            self.timezone.as_str(),
        ]
    }
}

/// Result of a successful lookup: the record plus the version of the
/// snapshot it was read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeoInfo {
    pub db_version: String,
    pub continent_code: String,
    pub record: GeoRecord,
}

impl GeoInfo {
    /// Attach a snapshot version and resolve the continent code.
    pub fn new(db_version: &str, record: GeoRecord) -> Self {
        Self {
            db_version: db_version.to_string(),
            continent_code: record.continent_code().to_string(),
            record,
        }
    }
}

/// Map a localized continent name to its two-letter code.
///
/// Unknown names pass through unchanged.
pub fn continent_code(name: &str) -> &str {
    match name {
        "亚洲" => "AP",
        "大洋洲" => "OA",
        "北美洲" => "NA",
        "南美洲" => "LA",
        "欧洲" => "EU",
        "非洲" => "AF",
        "南极洲" => "AQ",
        other => other,
    }
}
