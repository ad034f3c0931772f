//! GeoJSON to KML conversion engine.
//!
//! Conversion is two explicit phases: parse the input into a closed AST,
//! then render the AST to KML. Structural problems (missing `type`, bad
//! coordinates) are rejected at parse time with a descriptive message
//! instead of surfacing mid-render. Rendering is deterministic: identical
//! input yields byte-identical output.

use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid GeoJSON: {0}")]
    Parse(String),
}

/// A single coordinate. GeoJSON order is `[lon, lat, alt?]`; altitude
/// defaults to 0 when absent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub lon: f64,
    pub lat: f64,
    pub alt: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(Position),
    LineString(Vec<Position>),
    Polygon(Vec<Vec<Position>>),
    /// Recognized as a geometry object but not a renderable kind. The
    /// owning feature contributes no placemark; siblings still render.
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub name: String,
    pub geometry: Geometry,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GeoDocument {
    Feature(Feature),
    FeatureCollection(Vec<Feature>),
    Geometry(Geometry),
    /// Unrecognized top-level `type`. Renders an empty document body.
    Unknown(String),
}

const DEFAULT_NAME: &str = "Unnamed";

/// Convert a GeoJSON document to KML.
pub fn convert_to_kml(input: &str) -> Result<String, ConvertError> {
    let document = parse_document(input)?;
    Ok(render_kml(&document))
}

// ---------------------------------------------------------------------------
// Parse
// ---------------------------------------------------------------------------

/// Parse a GeoJSON string into the closed AST.
pub fn parse_document(input: &str) -> Result<GeoDocument, ConvertError> {
    let value: Value = serde_json::from_str(input)?;
    let top_type = type_of(&value)?;

    match top_type.as_str() {
        "Feature" => Ok(GeoDocument::Feature(parse_feature(&value)?)),
        "FeatureCollection" => {
            let features = value
                .get("features")
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    ConvertError::Parse("FeatureCollection has no 'features' array".to_string())
                })?;
            let parsed = features
                .iter()
                .map(parse_feature)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(GeoDocument::FeatureCollection(parsed))
        }
        "Point" | "LineString" | "Polygon" => {
            Ok(GeoDocument::Geometry(parse_geometry(&value)?))
        }
        other => Ok(GeoDocument::Unknown(other.to_string())),
    }
}

fn type_of(value: &Value) -> Result<String, ConvertError> {
    value
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ConvertError::Parse("missing or non-string 'type' field".to_string()))
}

fn parse_feature(value: &Value) -> Result<Feature, ConvertError> {
    let name = value
        .get("properties")
        .and_then(|p| p.get("name"))
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_NAME)
        .to_string();

    let geometry = value
        .get("geometry")
        .filter(|g| !g.is_null())
        .ok_or_else(|| ConvertError::Parse("feature has no geometry".to_string()))?;

    Ok(Feature {
        name,
        geometry: parse_geometry(geometry)?,
    })
}

fn parse_geometry(value: &Value) -> Result<Geometry, ConvertError> {
    let geometry_type = type_of(value)?;

    match geometry_type.as_str() {
        "Point" => Ok(Geometry::Point(parse_position(coordinates_of(value)?)?)),
        "LineString" => {
            let coords = coordinates_of(value)?
                .as_array()
                .ok_or_else(|| {
                    ConvertError::Parse("LineString coordinates must be an array".to_string())
                })?;
            Ok(Geometry::LineString(parse_positions(coords)?))
        }
        "Polygon" => {
            let rings = coordinates_of(value)?
                .as_array()
                .ok_or_else(|| {
                    ConvertError::Parse("Polygon coordinates must be an array of rings".to_string())
                })?;
            if rings.is_empty() {
                return Err(ConvertError::Parse("Polygon has no rings".to_string()));
            }
            let parsed = rings
                .iter()
                .map(|ring| {
                    ring.as_array()
                        .ok_or_else(|| {
                            ConvertError::Parse("Polygon ring must be an array".to_string())
                        })
                        .and_then(|positions| parse_positions(positions))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Geometry::Polygon(parsed))
        }
        other => Ok(Geometry::Unsupported(other.to_string())),
    }
}

fn coordinates_of(value: &Value) -> Result<&Value, ConvertError> {
    value
        .get("coordinates")
        .ok_or_else(|| ConvertError::Parse("geometry has no 'coordinates'".to_string()))
}

fn parse_positions(values: &[Value]) -> Result<Vec<Position>, ConvertError> {
    values.iter().map(parse_position).collect()
}

fn parse_position(value: &Value) -> Result<Position, ConvertError> {
    let parts = value.as_array().ok_or_else(|| {
        ConvertError::Parse("coordinate must be an array [lon, lat, alt?]".to_string())
    })?;
    if parts.len() < 2 {
        return Err(ConvertError::Parse(format!(
            "coordinate needs at least [lon, lat], got {} element(s)",
            parts.len()
        )));
    }

    let number = |v: &Value| -> Result<f64, ConvertError> {
        v.as_f64()
            .ok_or_else(|| ConvertError::Parse(format!("non-numeric coordinate value: {v}")))
    };

    Ok(Position {
        lon: number(&parts[0])?,
        lat: number(&parts[1])?,
        alt: parts.get(2).map(|v| number(v)).transpose()?.unwrap_or(0.0),
    })
}

// ---------------------------------------------------------------------------
// Render
// ---------------------------------------------------------------------------

fn render_kml(document: &GeoDocument) -> String {
    let mut kml = String::new();
    kml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    kml.push_str("<kml xmlns=\"http://www.opengis.net/kml/2.2\">\n");
    kml.push_str("  <Document>\n");

    match document {
        GeoDocument::Feature(feature) => render_feature(feature, &mut kml),
        GeoDocument::FeatureCollection(features) => {
            for feature in features {
                render_feature(feature, &mut kml);
            }
        }
        GeoDocument::Geometry(geometry) => render_geometry(geometry, DEFAULT_NAME, &mut kml),
        GeoDocument::Unknown(geo_type) => {
            tracing::warn!(geo_type = %geo_type, "Unknown GeoJSON type, emitting empty document");
        }
    }

    kml.push_str("  </Document>\n");
    kml.push_str("</kml>");
    kml
}

fn render_feature(feature: &Feature, kml: &mut String) {
    render_geometry(&feature.geometry, &feature.name, kml);
}

fn render_geometry(geometry: &Geometry, name: &str, kml: &mut String) {
    match geometry {
        Geometry::Point(position) => {
            kml.push_str("    <Placemark>\n");
            kml.push_str("      <name>");
            kml.push_str(&escape_xml(name));
            kml.push_str("</name>\n");
            kml.push_str("      <Point>\n");
            kml.push_str("        <coordinates>");
            kml.push_str(&format_position(position));
            kml.push_str("</coordinates>\n");
            kml.push_str("      </Point>\n");
            kml.push_str("    </Placemark>\n");
        }
        Geometry::LineString(positions) => {
            kml.push_str("    <Placemark>\n");
            kml.push_str("      <name>");
            kml.push_str(&escape_xml(name));
            kml.push_str("</name>\n");
            kml.push_str("      <LineString>\n");
            kml.push_str("        <coordinates>\n");
            kml.push_str("          ");
            kml.push_str(&format_positions(positions));
            kml.push('\n');
            kml.push_str("        </coordinates>\n");
            kml.push_str("      </LineString>\n");
            kml.push_str("    </Placemark>\n");
        }
        Geometry::Polygon(rings) => {
            // Only the outer boundary is rendered; holes are dropped.
            kml.push_str("    <Placemark>\n");
            kml.push_str("      <name>");
            kml.push_str(&escape_xml(name));
            kml.push_str("</name>\n");
            kml.push_str("      <Polygon>\n");
            kml.push_str("        <outerBoundaryIs>\n");
            kml.push_str("          <LinearRing>\n");
            kml.push_str("            <coordinates>\n");
            kml.push_str("              ");
            kml.push_str(&format_positions(&rings[0]));
            kml.push('\n');
            kml.push_str("            </coordinates>\n");
            kml.push_str("          </LinearRing>\n");
            kml.push_str("        </outerBoundaryIs>\n");
            kml.push_str("      </Polygon>\n");
            kml.push_str("    </Placemark>\n");
        }
        Geometry::Unsupported(geo_type) => {
            tracing::warn!(geo_type = %geo_type, "Unsupported geometry type, skipping placemark");
        }
    }
}

fn format_position(position: &Position) -> String {
    format!(
        "{},{},{}",
        format_coord(position.lon),
        format_coord(position.lat),
        format_coord(position.alt)
    )
}

fn format_positions(positions: &[Position]) -> String {
    positions
        .iter()
        .map(format_position)
        .collect::<Vec<_>>()
        .join(" ")
}

// Whole numbers keep a trailing ".0" so 0-altitude renders as "0.0".
fn format_coord(value: f64) -> String {
    if value.fract() == 0.0 && value.is_finite() {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
