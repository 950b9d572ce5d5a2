use crate::error::IngestError;
use crate::models::Triple;
use crate::step::{read_step_file, StepEntity, StepModel, StepValue};
use std::collections::HashSet;
use std::path::Path;

pub trait TripleExtractor {
    fn extract_triples(&self, path: &Path) -> Result<Vec<Triple>, IngestError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IfcTripleExtractor;

impl TripleExtractor for IfcTripleExtractor {
    fn extract_triples(&self, path: &Path) -> Result<Vec<Triple>, IngestError> {
        let model = read_step_file(path)?;
        Ok(triples_from_model(&model))
    }
}

pub fn extract_kg_triples(path: &Path) -> Result<Vec<Triple>, IngestError> {
    IfcTripleExtractor.extract_triples(path)
}

const PROPERTY_DEFINITIONS: &[&str] = &[
    "IFCPROPERTYSET",
    "IFCELEMENTQUANTITY",
    "IFCPROPERTYSETTEMPLATE",
    "IFCSIMPLEPROPERTYTEMPLATE",
    "IFCPERMEABLECOVERINGPROPERTIES",
];

const SPATIAL_ELEMENTS: &[&str] = &["IFCSITE", "IFCBUILDING", "IFCBUILDINGSTOREY", "IFCSPACE"];

/// Words that make up IFC entity names, used to restore their casing.
const CLASS_WORDS: &[&str] = &[
    "Accessory", "Actuator", "Air", "Alarm", "Alignment", "Anchor", "Annotation", "Appliance",
    "Area", "Assembly", "Audio", "Axis", "Bar", "Beam", "Boiler", "Box", "Bridge", "Building",
    "Built", "Burner", "Cable", "Carrier", "Case", "Chiller", "Chimney", "Civil", "Coil", "Column",
    "Communications", "Component", "Compressor", "Condenser", "Controller", "Conversion", "Cooled",
    "Cooler", "Course", "Covering", "Curtain", "Damper", "Deep", "Device", "Discrete",
    "Distribution", "Door", "Duct", "Earthworks", "Electric", "Element", "Energy", "Engine",
    "Evaporative", "Evaporator", "Exchanger", "Facility", "Fan", "Fastener", "Feature", "Fill",
    "Filter", "Fire", "Fitting", "Fixture", "Flight", "Flow", "Footing", "Foundation", "Furnishing",
    "Furniture", "Generator", "Geographic", "Grid", "Group", "Heat", "Heater", "Humidifier",
    "Interceptor", "Isolator", "Junction", "Kerb", "Lamp", "Light", "Linear", "Marine", "Material",
    "Mechanical", "Medical", "Member", "Mesh", "Motor", "Moving", "Opening", "Outlet", "Part",
    "Pavement", "Pile", "Pipe", "Plate", "Port", "Project", "Projection", "Protective", "Proxy",
    "Pump", "Rail", "Railing", "Railway", "Ramp", "Reinforcing", "Road", "Roof", "Sanitary",
    "Segment", "Sensor", "Shading", "Signal", "Site", "Slab", "Solar", "Space", "Spatial", "Stack",
    "Stair", "Standard", "Storage", "Storey", "Structure", "Style", "Suppression", "Surface",
    "System", "Tank", "Tendon", "Terminal", "Track", "Transformer", "Transport", "Tray", "Tube",
    "Tunnel", "Type", "Unit", "Valve", "Vibration", "Virtual", "Visual", "Voiding", "Wall", "Waste",
    "Window", "Zone",
];

/// Walks the model in instance-id order and emits de-duplicated triples.
pub fn triples_from_model(model: &StepModel) -> Vec<Triple> {
    let mut sink = TripleSink::default();

    for entity in model.entities() {
        if is_rooted_object(entity) {
            object_triples(entity, &mut sink);
        } else {
            relation_triples(model, entity, &mut sink);
        }
    }

    sink.triples
}

#[derive(Default)]
struct TripleSink {
    triples: Vec<Triple>,
    seen: HashSet<Triple>,
}

impl TripleSink {
    fn push(&mut self, subject: &str, predicate: &str, object: &str) {
        let triple = Triple::new(subject, predicate, object);
        if self.seen.insert(triple.clone()) {
            self.triples.push(triple);
        }
    }
}

fn object_triples(entity: &StepEntity, sink: &mut TripleSink) {
    let subject = entity_label(entity);

    sink.push(&subject, "isA", &class_name(&entity.class));
    if let Some(global_id) = entity.str_param(0) {
        sink.push(&subject, "hasGlobalId", global_id);
    }
    if let Some(description) = entity.str_param(3) {
        sink.push(&subject, "hasDescription", description);
    }

    let is_type_object = entity.class.ends_with("TYPE") || entity.class.ends_with("STYLE");
    if !is_type_object {
        if let Some(object_type) = entity.str_param(4) {
            sink.push(&subject, "hasObjectType", object_type);
        }
    }

    if SPATIAL_ELEMENTS.contains(&entity.class.as_str()) {
        if let Some(long_name) = entity.str_param(7) {
            sink.push(&subject, "hasLongName", long_name);
        }
    }
    if entity.class == "IFCBUILDINGSTOREY" {
        if let Some(elevation) = entity.param(9).and_then(normalize_value) {
            sink.push(&subject, "hasElevation", &elevation);
        }
    }
}

fn relation_triples(model: &StepModel, entity: &StepEntity, sink: &mut TripleSink) {
    let class = entity.class.as_str();

    match class {
        "IFCRELCONTAINEDINSPATIALSTRUCTURE" => {
            if let Some(structure) = entity.ref_param(5) {
                for element in entity.ref_params(4) {
                    relate(model, sink, element, "containedIn", structure);
                }
            }
        }
        "IFCRELAGGREGATES" | "IFCRELNESTS" => {
            let predicate = if class == "IFCRELAGGREGATES" {
                "partOf"
            } else {
                "nestedIn"
            };
            if let Some(whole) = entity.ref_param(4) {
                for part in entity.ref_params(5) {
                    relate(model, sink, part, predicate, whole);
                }
            }
        }
        "IFCRELDEFINESBYTYPE" => {
            if let Some(type_object) = entity.ref_param(5) {
                for object in entity.ref_params(4) {
                    relate(model, sink, object, "hasType", type_object);
                }
            }
        }
        "IFCRELASSOCIATESMATERIAL" => {
            let materials = entity
                .ref_param(5)
                .map(|material| material_names(model, material, 0))
                .unwrap_or_default();
            for object in entity.ref_params(4) {
                let Some(subject) = label(model, object) else {
                    continue;
                };
                for material in &materials {
                    sink.push(&subject, "hasMaterial", material);
                }
            }
        }
        "IFCRELDEFINESBYPROPERTIES" => {
            let values = entity
                .ref_param(5)
                .map(|definition| property_values(model, definition))
                .unwrap_or_default();
            for object in entity.ref_params(4) {
                let Some(subject) = label(model, object) else {
                    continue;
                };
                for (name, value) in &values {
                    if let Some(predicate) = property_predicate(name) {
                        sink.push(&subject, &predicate, value);
                    }
                }
            }
        }
        "IFCRELVOIDSELEMENT" => {
            if let (Some(element), Some(opening)) = (entity.ref_param(4), entity.ref_param(5)) {
                relate(model, sink, opening, "voids", element);
            }
        }
        "IFCRELFILLSELEMENT" => {
            if let (Some(opening), Some(element)) = (entity.ref_param(4), entity.ref_param(5)) {
                relate(model, sink, element, "fills", opening);
            }
        }
        _ if class.starts_with("IFCRELSPACEBOUNDARY") => {
            if let (Some(space), Some(element)) = (entity.ref_param(4), entity.ref_param(5)) {
                relate(model, sink, element, "boundsSpace", space);
            }
        }
        _ => {}
    }
}

fn relate(model: &StepModel, sink: &mut TripleSink, from: u64, predicate: &str, to: u64) {
    if let (Some(subject), Some(object)) = (label(model, from), label(model, to)) {
        sink.push(&subject, predicate, &object);
    }
}

fn label(model: &StepModel, id: u64) -> Option<String> {
    model.get(id).map(entity_label)
}

fn entity_label(entity: &StepEntity) -> String {
    let name = if is_rooted(entity) {
        entity.str_param(2)
    } else if entity.class == "IFCMATERIAL" {
        entity.str_param(0)
    } else {
        None
    };

    match name {
        Some(name) => name.to_string(),
        None => format!("{}_{}", class_name(&entity.class), entity.id),
    }
}

fn material_names(model: &StepModel, id: u64, depth: usize) -> Vec<String> {
    if depth > 8 {
        return Vec::new();
    }
    let Some(entity) = model.get(id) else {
        return Vec::new();
    };

    let nested = |ids: Vec<u64>| {
        let mut names = Vec::new();
        for child in ids {
            for name in material_names(model, child, depth + 1) {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    };

    match entity.class.as_str() {
        "IFCMATERIAL" => entity.str_param(0).map(str::to_string).into_iter().collect(),
        "IFCMATERIALLAYERSETUSAGE"
        | "IFCMATERIALPROFILESETUSAGE"
        | "IFCMATERIALLAYERSET"
        | "IFCMATERIALLAYER"
        | "IFCMATERIALLIST" => nested(entity.ref_params(0)),
        "IFCMATERIALCONSTITUENTSET"
        | "IFCMATERIALCONSTITUENT"
        | "IFCMATERIALPROFILESET"
        | "IFCMATERIALPROFILE" => nested(entity.ref_params(2)),
        _ => Vec::new(),
    }
}

fn property_values(model: &StepModel, id: u64) -> Vec<(String, String)> {
    let Some(definition) = model.get(id) else {
        return Vec::new();
    };

    let (members, value_index, quantities) = match definition.class.as_str() {
        "IFCPROPERTYSET" => (definition.ref_params(4), 2, false),
        "IFCELEMENTQUANTITY" => (definition.ref_params(5), 3, true),
        _ => return Vec::new(),
    };

    members
        .into_iter()
        .filter_map(|member| model.get(member))
        .filter(|member| {
            if quantities {
                member.class.starts_with("IFCQUANTITY")
            } else {
                matches!(
                    member.class.as_str(),
                    "IFCPROPERTYSINGLEVALUE" | "IFCPROPERTYENUMERATEDVALUE" | "IFCPROPERTYLISTVALUE"
                )
            }
        })
        .filter_map(|member| {
            let name = member.str_param(0)?;
            let value = member.param(value_index).and_then(normalize_value)?;
            Some((name.to_string(), value))
        })
        .collect()
}

/// Renders an attribute value as plain text; unset and reference values
/// have no textual form.
pub fn normalize_value(value: &StepValue) -> Option<String> {
    match value {
        StepValue::Unset | StepValue::Derived | StepValue::Ref(_) => None,
        StepValue::String(text) => {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        StepValue::Enum(literal) => Some(match literal.as_str() {
            "T" => "true".to_string(),
            "F" => "false".to_string(),
            "U" => "unknown".to_string(),
            other => other.to_string(),
        }),
        StepValue::Integer(number) => Some(number.to_string()),
        StepValue::Real(number) => Some(format_real(*number)),
        StepValue::Typed { value, .. } => normalize_value(value),
        StepValue::List(items) => {
            let parts: Vec<String> = items.iter().filter_map(normalize_value).collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
    }
}

fn format_real(number: f64) -> String {
    if number.fract() == 0.0 && number.abs() < 1e15 {
        format!("{number:.1}")
    } else {
        number.to_string()
    }
}

/// `"Fire Rating"` becomes `"hasFireRating"`.
pub fn property_predicate(name: &str) -> Option<String> {
    let words: String = name
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect();

    (!words.is_empty()).then(|| format!("has{words}"))
}

/// `IFCMECHANICALFASTENER` becomes `IfcMechanicalFastener`. The split uses
/// the fewest known words; names that do not split keep one capital.
fn class_name(step_class: &str) -> String {
    let upper = step_class.to_ascii_uppercase();
    let Some(rest) = upper.strip_prefix("IFC") else {
        return step_class.to_string();
    };

    // best[i]: (word count, start of last word, word) for the prefix rest[..i]
    let mut best: Vec<Option<(usize, usize, &str)>> = vec![None; rest.len() + 1];
    best[0] = Some((0, 0, ""));
    for start in 0..rest.len() {
        let Some((count, _, _)) = best[start] else {
            continue;
        };
        for word in CLASS_WORDS {
            let end = start + word.len();
            let fits = rest
                .get(start..end)
                .is_some_and(|piece| piece.eq_ignore_ascii_case(word));
            if fits && best[end].map_or(true, |(existing, _, _)| count + 1 < existing) {
                best[end] = Some((count + 1, start, *word));
            }
        }
    }

    let mut words = Vec::new();
    let mut end = rest.len();
    while end > 0 {
        let Some((_, start, word)) = best[end] else {
            return format!("Ifc{}", capitalize(rest));
        };
        words.push(word);
        end = start;
    }
    words.reverse();
    format!("Ifc{}", words.concat())
}

fn capitalize(upper: &str) -> String {
    let mut chars = upper.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

fn is_global_id(value: &str) -> bool {
    value.len() == 22
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn is_rooted(entity: &StepEntity) -> bool {
    entity.str_param(0).is_some_and(is_global_id)
}

fn is_rooted_object(entity: &StepEntity) -> bool {
    is_rooted(entity)
        && !entity.class.starts_with("IFCREL")
        && !PROPERTY_DEFINITIONS.contains(&entity.class.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::SAMPLE_IFC;
    use crate::step::parse_step;

    fn sample_triples() -> Vec<Triple> {
        let model = parse_step(SAMPLE_IFC).expect("sample should parse");
        triples_from_model(&model)
    }

    #[test]
    fn extracts_object_attributes() {
        let triples = sample_triples();
        assert!(triples.contains(&Triple::new("Wall-1", "isA", "IfcWall")));
        assert!(triples.contains(&Triple::new(
            "Wall-1",
            "hasGlobalId",
            "3cUkl32yn9qRSPvBJVyWYp"
        )));
        assert!(triples.contains(&Triple::new("Wall-1", "hasDescription", "Exterior wall")));
        assert!(triples.contains(&Triple::new("Main Building", "hasLongName", "Residential block")));
        assert!(triples.contains(&Triple::new("Level 1", "hasElevation", "0.0")));
        assert!(triples.contains(&Triple::new("IfcDoor_21", "hasObjectType", "Single swing")));
    }

    #[test]
    fn extracts_relations_materials_and_properties() {
        let triples = sample_triples();
        assert!(triples.contains(&Triple::new("Level 1", "partOf", "Main Building")));
        assert!(triples.contains(&Triple::new("Wall-1", "containedIn", "Level 1")));
        assert!(triples.contains(&Triple::new("IfcDoor_21", "containedIn", "Level 1")));
        assert!(triples.contains(&Triple::new("Wall-1", "hasMaterial", "Concrete")));
        assert!(triples.contains(&Triple::new("Wall-1", "hasHeight", "3.0")));
        assert!(triples.contains(&Triple::new("Wall-1", "hasIsExternal", "true")));
        assert!(triples.contains(&Triple::new("Wall-1", "hasFireRating", "REI 60")));
    }

    #[test]
    fn property_sets_and_relationships_are_not_objects() {
        let triples = sample_triples();
        assert!(!triples
            .iter()
            .any(|triple| triple.subject == "Pset_WallCommon" && triple.predicate == "isA"));
        assert!(!triples.iter().any(|triple| triple.object.starts_with("IFCREL")));
    }

    #[test]
    fn extraction_is_deterministic() {
        assert_eq!(sample_triples(), sample_triples());
        let first = sample_triples();
        assert_eq!(first[0], Triple::new("Sample House", "isA", "IfcProject"));
    }

    #[test]
    fn normalizes_values() {
        assert_eq!(normalize_value(&StepValue::Real(3.0)).as_deref(), Some("3.0"));
        assert_eq!(normalize_value(&StepValue::Real(0.25)).as_deref(), Some("0.25"));
        assert_eq!(
            normalize_value(&StepValue::Enum("F".to_string())).as_deref(),
            Some("false")
        );
        assert_eq!(normalize_value(&StepValue::Unset), None);
        assert_eq!(normalize_value(&StepValue::String("  ".to_string())), None);
        assert_eq!(
            normalize_value(&StepValue::List(vec![
                StepValue::Integer(1),
                StepValue::Unset,
                StepValue::Integer(2),
            ]))
            .as_deref(),
            Some("1, 2")
        );
    }

    #[test]
    fn property_names_become_predicates() {
        assert_eq!(property_predicate("Fire Rating").as_deref(), Some("hasFireRating"));
        assert_eq!(property_predicate("IsExternal").as_deref(), Some("hasIsExternal"));
        assert_eq!(property_predicate(" - "), None);
    }

    #[test]
    fn class_names_share_one_casing() {
        assert_eq!(class_name("IFCWALL"), "IfcWall");
        assert_eq!(class_name("IFCWALLSTANDARDCASE"), "IfcWallStandardCase");
        assert_eq!(class_name("IFCBUILDINGSTOREY"), "IfcBuildingStorey");
        assert_eq!(class_name("IFCMECHANICALFASTENER"), "IfcMechanicalFastener");
        assert_eq!(class_name("IFCAIRTERMINALBOX"), "IfcAirTerminalBox");
        assert_eq!(class_name("IFCBUILDINGELEMENTPROXY"), "IfcBuildingElementProxy");
        assert_eq!(class_name("IFCFURNITURE"), "IfcFurniture");
        assert_eq!(class_name("IFCQWERTY"), "IfcQwerty");
        assert_eq!(class_name("IFC"), "Ifc");
        assert_eq!(class_name("CUSTOMTHING"), "CUSTOMTHING");
    }

    #[test]
    fn unreadable_file_is_an_error() {
        let result = extract_kg_triples(Path::new("/definitely/missing/model.ifc"));
        assert!(matches!(result, Err(IngestError::Io(_))));
    }
}
