//! The value engine: a recursive value tree, its merge rules, and the
//! assembly of the render context a chart is evaluated against.

#[macro_use]
extern crate serde_derive;
extern crate serde_json;
extern crate serde_yaml;

#[macro_use]
extern crate log;

#[macro_use]
extern crate error_chain;
error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }
    links {}
    foreign_links {
        Io(::std::io::Error);
        SerdeY(serde_yaml::Error);
        SerdeJ(serde_json::Error);
    }
    errors {
        InvalidValuesFile(path: String) {
            description("values file could not be parsed")
            display("values file '{}' could not be parsed", path)
        }
        InvalidOverride(kv: String) {
            description("--set value could not be parsed")
            display("--set value '{}' could not be parsed", kv)
        }
        SchemaViolation(pointer: String, message: String) {
            description("values do not validate against the chart's schema")
            display("{}: {}", pointer, message)
        }
        UnknownCapabilityPath(path: String) {
            description("unknown path into .Capabilities")
            display("unknown path into .Capabilities: {}", path)
        }
    }
}

/// The recursive value tree.
pub mod value;
pub use value::Value;

/// Release/cluster/chart render-context assembly.
pub mod context;
pub use context::{Capabilities, KubeVersion, ReleaseContext, RenderContext};

/// JSON-schema validation of a merged value tree.
pub mod schema;

/// The merge pipeline described in spec §4.3.
pub mod engine;
pub use engine::{ValueOverride, ValuesLayer};
