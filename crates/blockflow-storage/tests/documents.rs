//! Persisted document shape and full save/load round trips.

use blockflow_core::{BlockId, BlockKind, Direction, FlowGraph, ImportedFunction, PortRef};
use blockflow_storage::{
    decompose, export_function, import_artifact, recompose, DocumentStore, InMemoryStore,
};

fn port(block: BlockId, index: usize) -> PortRef {
    PortRef::new(block, index)
}

#[test]
fn document_shape() {
    let mut graph = FlowGraph::new();
    let src = graph.add_block(BlockKind::DataSource);
    graph.attach_source(src, "iris.csv").unwrap();
    let sink = graph.add_block(BlockKind::DataOut);
    graph.connect(port(src, 0), port(sink, 0)).unwrap();

    insta::assert_json_snapshot!(decompose(&graph), @r###"
    {
      "blocks": [
        {
          "id": 0,
          "name": "data_source",
          "caption": "data_source",
          "input_ports": [],
          "output_ports": [
            {
              "index": 0,
              "type_tag": "iris",
              "annotation": ""
            }
          ],
          "source": "iris.csv"
        },
        {
          "id": 1,
          "name": "data_out",
          "caption": "data_out",
          "input_ports": [
            {
              "index": 0,
              "type_id": "DataNode"
            }
          ],
          "output_ports": []
        }
      ],
      "connections": [
        {
          "out_block": 0,
          "out_port": 0,
          "in_block": 1,
          "in_port": 0
        }
      ]
    }
    "###);
}

/// Builds: iris -> split_data -> trainer -> func_out, plus a transform
/// feeding a composer with a renamed function output.
fn pipeline() -> FlowGraph {
    let mut graph = FlowGraph::new();
    let src = graph.add_block(BlockKind::DataSource);
    graph.attach_source(src, "iris.csv").unwrap();
    let labels = graph.add_block(BlockKind::DataSource);
    graph.attach_source(labels, "species.csv").unwrap();
    let split = graph.add_block(BlockKind::SplitData);
    graph.connect(port(src, 0), port(split, 0)).unwrap();
    graph.connect(port(labels, 0), port(split, 1)).unwrap();

    let trainer = graph.add_block(BlockKind::Trainer);
    graph.set_caption(trainer, "forest").unwrap();
    graph.connect(port(split, 0), port(trainer, 0)).unwrap();
    graph.connect(port(split, 2), port(trainer, 1)).unwrap();
    let out = graph.add_block(BlockKind::FuncOut);
    graph.connect(port(trainer, 0), port(out, 0)).unwrap();

    let scaler = graph.add_block(BlockKind::Transform);
    graph.connect(port(src, 0), port(scaler, 0)).unwrap();
    graph.rename_output(port(scaler, 0), "scale").unwrap();
    let composer = graph.add_block(BlockKind::Composer);
    graph.set_input_count(composer, 2).unwrap();
    graph.connect(port(scaler, 0), port(composer, 0)).unwrap();
    graph.connect(port(trainer, 0), port(composer, 1)).unwrap();
    graph
}

#[test]
fn pipeline_survives_a_store_round_trip() {
    let graph = pipeline();
    let mut store = InMemoryStore::new();
    store.save_graph("iris", &graph).unwrap();
    let loaded = store.load_graph("iris").unwrap();

    assert!(loaded.is_consistent());
    assert_eq!(decompose(&loaded), decompose(&graph));
    assert_eq!(loaded.registry().len(), graph.registry().len());

    let forest = loaded.block_by_caption("forest").unwrap();
    assert_eq!(loaded.port_caption(forest, Direction::Input, 0), Some("iris_train"));
    let scaler = loaded.block_by_caption("transform").unwrap();
    assert_eq!(loaded.port_caption(scaler, Direction::Output, 0), Some("scale"));
}

#[test]
fn exported_model_imports_into_another_graph() {
    let graph = pipeline();
    let out = graph.block_by_caption("func_out").unwrap();
    let artifact = export_function(&graph, out, "/work/iris.json").unwrap();

    let mut other = FlowGraph::new();
    let source = other.add_block(BlockKind::FuncSource);
    let signature = import_artifact(&mut other, source, &artifact).unwrap();
    assert_eq!(signature.arity(), (1, 1));

    // The imported block survives its own save/load with the same ids.
    let reloaded = recompose(&decompose(&other)).unwrap();
    let value = reloaded.output_value(port(source, 0)).unwrap();
    assert_eq!(value.as_function().unwrap().signature(), &signature);
    assert_eq!(value.name(), "func_out");
}

#[test]
fn reloads_after_edges_reuse_freed_slots() {
    let mut graph = FlowGraph::new();
    let src = graph.add_block(BlockKind::DataSource);
    graph.attach_source(src, "x.csv").unwrap();
    let sink_a = graph.add_block(BlockKind::DataOut);
    let sink_b = graph.add_block(BlockKind::DataOut);
    let fs = graph.add_block(BlockKind::FuncSource);
    graph
        .import_function(fs, ImportedFunction {
            name: "surrogate".into(),
            file_hash: "0f1e".into(),
            inputs: vec![7],
            outputs: vec![9],
        })
        .unwrap();
    let sensitivity = graph.add_block(BlockKind::SensitivityAnalysis);
    let process = graph.add_block(BlockKind::Process);

    let first = graph.connect(port(src, 0), port(sink_a, 0)).unwrap();
    let second = graph.connect(port(src, 0), port(sink_b, 0)).unwrap();
    graph.connect(port(fs, 0), port(sensitivity, 0)).unwrap();
    graph.connect(port(fs, 0), port(process, 0)).unwrap();
    graph.disconnect(first).unwrap();
    graph.disconnect(second).unwrap();

    // Both new edges land in freed slots and target ports that only exist
    // once the function edges above are in place.
    graph.connect(port(sensitivity, 3), port(sink_a, 0)).unwrap();
    graph.connect(port(src, 0), port(process, 1)).unwrap();

    let mut store = InMemoryStore::new();
    store.save_graph("surrogate", &graph).unwrap();
    let loaded = store.load_graph("surrogate").unwrap();

    assert!(loaded.is_consistent());
    assert_eq!(loaded.connection_count(), 4);
    assert_eq!(decompose(&loaded), decompose(&graph));
    assert_eq!(
        loaded.input_value(port(sink_a, 0)).unwrap().type_id(),
        loaded.output_value(port(sensitivity, 3)).unwrap().type_id()
    );
    assert!(loaded.input_value(port(process, 1)).is_some());
}
