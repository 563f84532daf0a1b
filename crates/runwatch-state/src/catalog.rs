//! Static registry of the backing stores agents may query.

pub struct SourceSpec {
    pub key: &'static str,
    pub name: &'static str,
    pub provider: &'static str,
}

pub const DATA_SOURCES: &[SourceSpec] = &[
    SourceSpec {
        key: "SQL",
        name: "Azure SQL",
        provider: "Azure",
    },
    SourceSpec {
        key: "KQL",
        name: "Eventhouse KQL",
        provider: "Fabric",
    },
    SourceSpec {
        key: "GRAPH",
        name: "Route Graph",
        provider: "Fabric",
    },
    SourceSpec {
        key: "NOSQL",
        name: "Cosmos DB",
        provider: "Azure",
    },
    SourceSpec {
        key: "FABRIC_SQL",
        name: "Fabric SQL",
        provider: "Fabric",
    },
    SourceSpec {
        key: "VECTOR_OPS",
        name: "AI Search (ops)",
        provider: "Azure",
    },
    SourceSpec {
        key: "VECTOR_REG",
        name: "AI Search (regulatory)",
        provider: "Azure",
    },
    SourceSpec {
        key: "VECTOR_AIRPORT",
        name: "AI Search (airports)",
        provider: "Azure",
    },
];

pub fn lookup(key: &str) -> Option<&'static SourceSpec> {
    DATA_SOURCES.iter().find(|spec| spec.key == key)
}
