//! Typed command builders and reply decoding for the spatial-index's
//! Redis-family text protocol (§6). Nothing here spreads mixed-type
//! arguments; every command is a distinct variant that knows how to
//! serialize itself to the wire.

use crate::engine::model::Coordinate;

/// One field/value pair attached to a `SET` command.
#[derive(Debug, Clone)]
pub struct Field {
    pub key: String,
    pub value: String,
}

impl Field {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Field {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum WithinShape {
    Bounds {
        min_lat: f64,
        min_lon: f64,
        max_lat: f64,
        max_lon: f64,
    },
    Polygon(Vec<Coordinate>),
}

/// A single spatial-index command, built through typed constructors
/// rather than a positional argument spread.
#[derive(Debug, Clone)]
pub enum Command {
    Ping,
    SetPoint {
        collection: String,
        id: String,
        fields: Vec<Field>,
        ex_seconds: Option<u64>,
        point: Coordinate,
    },
    SetObjectPolygon {
        collection: String,
        id: String,
        fields: Vec<Field>,
        ring: Vec<Coordinate>,
    },
    GetWithFields {
        collection: String,
        id: String,
    },
    Del {
        collection: String,
        id: String,
    },
    Nearby {
        collection: String,
        limit: Option<u32>,
        point: Coordinate,
        radius_m: f64,
    },
    Within {
        collection: String,
        limit: Option<u32>,
        shape: WithinShape,
    },
    IntersectsPoint {
        collection: String,
        point: Coordinate,
    },
    IntersectsPolygon {
        collection: String,
        ring: Vec<Coordinate>,
    },
    SetHook {
        name: String,
        url: String,
        collection: String,
        ring: Vec<Coordinate>,
    },
    DelHook {
        name: String,
    },
    Stats {
        collection: String,
    },
    Server,
    Scan {
        collection: String,
        limit: Option<u32>,
        with_fields: bool,
    },
    BgRewriteAof,
}

fn geojson_polygon(ring: &[Coordinate]) -> String {
    // GeoJSON coordinate order is (lon, lat).
    let coords: Vec<String> = ring
        .iter()
        .map(|c| format!("[{},{}]", c.lon, c.lat))
        .collect();
    format!(
        r#"{{"type":"Polygon","coordinates":[[{}]]}}"#,
        coords.join(",")
    )
}

impl Command {
    /// Serializes to a single newline-terminated wire line, the framing
    /// the spatial-index server expects.
    pub fn encode(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        match self {
            Command::Ping => parts.push("PING".into()),
            Command::SetPoint {
                collection,
                id,
                fields,
                ex_seconds,
                point,
            } => {
                parts.push("SET".into());
                parts.push(collection.clone());
                parts.push(id.clone());
                for f in fields {
                    parts.push("FIELD".into());
                    parts.push(f.key.clone());
                    parts.push(f.value.clone());
                }
                if let Some(ex) = ex_seconds {
                    parts.push("EX".into());
                    parts.push(ex.to_string());
                }
                parts.push("POINT".into());
                parts.push(point.lat.to_string());
                parts.push(point.lon.to_string());
            }
            Command::SetObjectPolygon {
                collection,
                id,
                fields,
                ring,
            } => {
                parts.push("SET".into());
                parts.push(collection.clone());
                parts.push(id.clone());
                for f in fields {
                    parts.push("FIELD".into());
                    parts.push(f.key.clone());
                    parts.push(f.value.clone());
                }
                parts.push("OBJECT".into());
                parts.push(geojson_polygon(ring));
            }
            Command::GetWithFields { collection, id } => {
                parts.push("GET".into());
                parts.push(collection.clone());
                parts.push(id.clone());
                parts.push("WITHFIELDS".into());
            }
            Command::Del { collection, id } => {
                parts.push("DEL".into());
                parts.push(collection.clone());
                parts.push(id.clone());
            }
            Command::Nearby {
                collection,
                limit,
                point,
                radius_m,
            } => {
                parts.push("NEARBY".into());
                parts.push(collection.clone());
                if let Some(l) = limit {
                    parts.push("LIMIT".into());
                    parts.push(l.to_string());
                }
                parts.push("POINT".into());
                parts.push(point.lat.to_string());
                parts.push(point.lon.to_string());
                parts.push(radius_m.to_string());
            }
            Command::Within {
                collection,
                limit,
                shape,
            } => {
                parts.push("WITHIN".into());
                parts.push(collection.clone());
                if let Some(l) = limit {
                    parts.push("LIMIT".into());
                    parts.push(l.to_string());
                }
                match shape {
                    WithinShape::Bounds {
                        min_lat,
                        min_lon,
                        max_lat,
                        max_lon,
                    } => {
                        parts.push("BOUNDS".into());
                        parts.push(min_lat.to_string());
                        parts.push(min_lon.to_string());
                        parts.push(max_lat.to_string());
                        parts.push(max_lon.to_string());
                    }
                    WithinShape::Polygon(ring) => {
                        parts.push("POLYGON".into());
                        for c in ring {
                            parts.push(c.lon.to_string());
                            parts.push(c.lat.to_string());
                        }
                    }
                }
            }
            Command::IntersectsPoint { collection, point } => {
                parts.push("INTERSECTS".into());
                parts.push(collection.clone());
                parts.push("POINT".into());
                parts.push(point.lat.to_string());
                parts.push(point.lon.to_string());
            }
            Command::IntersectsPolygon { collection, ring } => {
                parts.push("INTERSECTS".into());
                parts.push(collection.clone());
                parts.push("POLYGON".into());
                for c in ring {
                    parts.push(c.lon.to_string());
                    parts.push(c.lat.to_string());
                }
            }
            Command::SetHook {
                name,
                url,
                collection,
                ring,
            } => {
                parts.push("SETHOOK".into());
                parts.push(name.clone());
                parts.push(url.clone());
                parts.push("WITHIN".into());
                parts.push(collection.clone());
                parts.push("POLYGON".into());
                for c in ring {
                    parts.push(c.lon.to_string());
                    parts.push(c.lat.to_string());
                }
            }
            Command::DelHook { name } => {
                parts.push("PDELHOOK".into());
                parts.push(name.clone());
            }
            Command::Stats { collection } => {
                parts.push("STATS".into());
                parts.push(collection.clone());
            }
            Command::Server => parts.push("SERVER".into()),
            Command::Scan {
                collection,
                limit,
                with_fields,
            } => {
                parts.push("SCAN".into());
                parts.push(collection.clone());
                if let Some(l) = limit {
                    parts.push("LIMIT".into());
                    parts.push(l.to_string());
                }
                if *with_fields {
                    parts.push("WITHFIELDS".into());
                }
            }
            Command::BgRewriteAof => parts.push("BGREWRITEAOF".into()),
        }
        let mut line = parts.join(" ");
        line.push('\n');
        line
    }
}

/// A decoded reply from the spatial index. The real wire protocol is
/// bulk-string/array based; this crate only needs to distinguish success,
/// failure, and a raw payload to hand to higher layers for JSON decoding.
#[derive(Debug, Clone)]
pub enum Reply {
    Ok,
    OkWithPayload(String),
    Err(String),
}

impl Reply {
    pub fn parse(line: &str) -> Reply {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if let Some(rest) = trimmed.strip_prefix("ERR ") {
            Reply::Err(rest.to_string())
        } else if trimmed == "OK" {
            Reply::Ok
        } else {
            Reply::OkWithPayload(trimmed.to_string())
        }
    }

    pub fn is_ok(&self) -> bool {
        !matches!(self, Reply::Err(_))
    }
}
