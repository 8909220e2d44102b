//! Builds a [`Pipeline`] from a declarative JSON document: named
//! filters instantiated through a caller-provided factory, then wired
//! together in the order the connection list names them (spec.md
//! §4.K/§6).
//!
//! Grounded on `original_source/src/lib_pipeline/graph_builder.cpp`'s
//! `createPipelineFromJSON`: RapidJSON parses `{version, modules,
//! connections}`; each `modules` entry carries a `type` and a `config`
//! an app-supplied `parseModuleConfig` turns into constructor arguments;
//! each `connections` entry is a JSON object whose first member is the
//! source pin (`name -> output index`) and whose remaining members are
//! destination pins (`name -> input index`), connected in declaration
//! order. Here `serde_json` (with its `preserve_order` feature, so a
//! JSON object's key order survives into a `serde_json::Map`) replaces
//! RapidJSON, and the factory is a [`ModuleFactory`] instead of a
//! `void*`-typed callback.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::LoaderError;
use crate::filter::FilterModule;
use crate::pipeline::Pipeline;

/// The only graph-document version this loader understands (spec.md
/// §4.K: "Validates version equals the single supported value").
pub const GRAPH_VERSION: u64 = 1;

#[derive(Debug, Deserialize)]
struct GraphDocument {
    version: u64,
    modules: HashMap<String, ModuleDescriptor>,
    #[serde(default)]
    connections: Vec<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct ModuleDescriptor {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    config: Value,
}

/// Instantiates a module of `kind` from `config`. Supplied by the
/// caller: this crate knows nothing about concrete filter types
/// (spec.md §1 — codec/demux/mux/etc. implementations are external
/// collaborators).
pub trait ModuleFactory: Send + Sync {
    fn create(
        &self,
        kind: &str,
        config: &Value,
    ) -> Result<Arc<dyn FilterModule>, Box<dyn std::error::Error + Send + Sync>>;
}

impl<F> ModuleFactory for F
where
    F: Fn(&str, &Value) -> Result<Arc<dyn FilterModule>, Box<dyn std::error::Error + Send + Sync>>
        + Send
        + Sync,
{
    fn create(
        &self,
        kind: &str,
        config: &Value,
    ) -> Result<Arc<dyn FilterModule>, Box<dyn std::error::Error + Send + Sync>> {
        self(kind, config)
    }
}

fn pin_index(name: &str, value: &Value) -> Result<usize, LoaderError> {
    value
        .as_u64()
        .map(|v| v as usize)
        .ok_or_else(|| LoaderError::InvalidPinIndex(format!("{name}: {value}")))
}

/// Parses `json`, instantiates every declared module through `factory`
/// and adds it to `pipeline`, then wires the declared connections.
///
/// Each connection object's first entry is the source pin (`module name
/// -> output index`); every remaining entry is a destination pin
/// (`module name -> input index`), connected to that same source output
/// in the object's key order (spec.md §4.K: "the first entry is the
/// source pin, subsequent entries are destination pins"). Referencing a
/// module name absent from `modules` is fatal, per spec.md §4.K
/// ("Unknown names are fatal").
pub fn load_graph(
    pipeline: &Arc<Pipeline>,
    json: &str,
    factory: &dyn ModuleFactory,
) -> Result<(), LoaderError> {
    let doc: GraphDocument = serde_json::from_str(json)?;
    if doc.version != GRAPH_VERSION {
        return Err(LoaderError::UnsupportedVersion {
            found: doc.version,
            expected: GRAPH_VERSION,
        });
    }

    for (name, descriptor) in &doc.modules {
        let module = factory
            .create(&descriptor.kind, &descriptor.config)
            .map_err(|source| LoaderError::Factory {
                module: name.clone(),
                kind: descriptor.kind.clone(),
                source,
            })?;
        pipeline.add_module(name.clone(), module);
    }

    for connection in &doc.connections {
        let mut pins = connection.iter();
        let Some((src_name, src_idx_value)) = pins.next() else {
            continue; // an empty connection entry names nothing to wire
        };
        if !doc.modules.contains_key(src_name) {
            return Err(LoaderError::UnknownModule(src_name.clone()));
        }
        let src_idx = pin_index(src_name, src_idx_value)?;

        for (dst_name, dst_idx_value) in pins {
            if !doc.modules.contains_key(dst_name) {
                return Err(LoaderError::UnknownModule(dst_name.clone()));
            }
            let dst_idx = pin_index(dst_name, dst_idx_value)?;
            pipeline
                .connect(src_name, src_idx, dst_name, dst_idx, false)
                .map_err(|err| LoaderError::Connect(Box::new(err)))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use crate::config::PipelineConfig;
    use crate::data::Sample;
    use crate::error::FilterError;
    use crate::filter::ModuleSignal;
    use crate::port::Output;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct OneShotSource;
    impl FilterModule for OneShotSource {
        fn num_inputs(&self) -> usize {
            0
        }
        fn num_outputs(&self) -> usize {
            1
        }
        fn process_sample(&self, _i: usize, _s: Arc<Sample>, _o: &[Arc<Output>]) -> Result<(), FilterError> {
            unreachable!()
        }
        fn process_source(&self, outputs: &[Arc<Output>]) -> Result<ModuleSignal, FilterError> {
            outputs[0].post(Some(Sample::raw(vec![42])));
            Ok(ModuleSignal::Done)
        }
    }

    struct CountingSink {
        count: Arc<AtomicUsize>,
    }
    impl FilterModule for CountingSink {
        fn num_inputs(&self) -> usize {
            1
        }
        fn num_outputs(&self) -> usize {
            0
        }
        fn process_sample(&self, _i: usize, _s: Arc<Sample>, _o: &[Arc<Output>]) -> Result<(), FilterError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn factory(count: Arc<AtomicUsize>) -> impl ModuleFactory {
        move |kind: &str, _config: &Value| -> Result<Arc<dyn FilterModule>, Box<dyn std::error::Error + Send + Sync>> {
            match kind {
                "source" => Ok(Arc::new(OneShotSource) as Arc<dyn FilterModule>),
                "sink" => Ok(Arc::new(CountingSink { count: Arc::clone(&count) }) as Arc<dyn FilterModule>),
                other => Err(format!("unknown module type {other:?}").into()),
            }
        }
    }

    #[test]
    fn loads_modules_and_connects_them_in_declared_order() {
        let pipeline = Pipeline::new(Arc::new(VirtualClock::frozen()), PipelineConfig::mono(), None);
        let count = Arc::new(AtomicUsize::new(0));

        let json = r#"{
            "version": 1,
            "modules": {
                "src": { "type": "source" },
                "snk": { "type": "sink" }
            },
            "connections": [
                { "src": 0, "snk": 0 }
            ]
        }"#;

        load_graph(&pipeline, json, &factory(Arc::clone(&count))).unwrap();

        pipeline.start();
        pipeline.wait_for_end_of_stream().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let pipeline = Pipeline::new(Arc::new(VirtualClock::frozen()), PipelineConfig::mono(), None);
        let json = r#"{"version": 2, "modules": {}, "connections": []}"#;
        let err = load_graph(&pipeline, json, &factory(Arc::new(AtomicUsize::new(0))));
        assert!(matches!(
            err,
            Err(LoaderError::UnsupportedVersion { found: 2, expected: 1 })
        ));
    }

    #[test]
    fn unknown_module_name_in_connections_is_fatal() {
        let pipeline = Pipeline::new(Arc::new(VirtualClock::frozen()), PipelineConfig::mono(), None);
        let json = r#"{
            "version": 1,
            "modules": { "src": { "type": "source" } },
            "connections": [ { "src": 0, "ghost": 0 } ]
        }"#;
        let err = load_graph(&pipeline, json, &factory(Arc::new(AtomicUsize::new(0))));
        assert!(matches!(err, Err(LoaderError::UnknownModule(name)) if name == "ghost"));
    }
}
