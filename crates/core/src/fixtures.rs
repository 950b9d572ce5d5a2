pub(crate) const SAMPLE_IFC: &str = include_str!("../tests/data/sample.ifc");
