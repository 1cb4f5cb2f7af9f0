//! The template renderer and the manifest splitter/sorter — turns a chart
//! tree and a merged render context into an ordered, hook-classified
//! manifest stream (spec §4.4).

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
    links {
        Core(chartkit_core::Error, chartkit_core::ErrorKind);
        Values(chartkit_values::Error, chartkit_values::ErrorKind);
    }
    foreign_links {
        Io(::std::io::Error);
        SerdeY(serde_yaml::Error);
        SerdeJ(serde_json::Error);
        Tera(tera::Error);
    }
    errors {
        RenderFailure(path: String, line: u32, message: String) {
            description("template evaluation failed")
            display("{}:{}: {}", path, line, message)
        }
    }
}

/// The template renderer trait and its `tera`-backed default implementation.
pub mod renderer;
pub use renderer::{RenderedChart, Renderer, TeraRenderer};

/// Manifest splitting, hook classification, and install/uninstall sorting.
pub mod manifest;
pub use manifest::{DeletePolicy, Document, Hook, HookEvent, ManifestStream};
