//! End-to-end editing scenarios on a single FlowGraph.

use blockflow_core::{
    BindOutcome, BlockId, BlockKind, CoreError, Direction, FlowGraph, GraphEvent,
    IdentityRegistry, ImportedFunction, PortKind, PortRef, Signature, TypeId,
};

fn data_source(graph: &mut FlowGraph, file: &str) -> BlockId {
    let id = graph.add_block(BlockKind::DataSource);
    graph.attach_source(id, file).unwrap();
    id
}

fn output_type(graph: &FlowGraph, block: BlockId, index: usize) -> TypeId {
    graph
        .output_value(PortRef::new(block, index))
        .unwrap()
        .type_id()
}

fn function_output(graph: &FlowGraph, block: BlockId, index: usize) -> Signature {
    graph
        .output_value(PortRef::new(block, index))
        .unwrap()
        .as_function()
        .unwrap()
        .signature()
        .clone()
}

#[test]
fn fresh_ids_count_up_from_zero() {
    let mut reg = IdentityRegistry::new();
    assert_eq!(reg.create_uid(), TypeId(0));
    assert_eq!(reg.create_uid(), TypeId(1));
}

#[test]
fn taken_tags_are_disambiguated() {
    let mut reg = IdentityRegistry::new();
    let first = reg.create_uid_with_tag("alpha");
    let second = reg.create_uid_with_tag("alpha");
    assert_eq!((first, reg.tag(first)), (TypeId(0), "alpha"));
    assert_eq!((second, reg.tag(second)), (TypeId(1), "alpha_2"));
}

#[test]
fn binding_a_taken_tag_merges_ports() {
    let mut graph = FlowGraph::new();
    let x = data_source(&mut graph, "x.csv");
    let y = data_source(&mut graph, "y.csv");
    assert_eq!(output_type(&graph, x, 0), TypeId(0));
    assert_eq!(output_type(&graph, y, 0), TypeId(1));

    graph.bind(TypeId(1), "x");

    for block in [x, y] {
        let value = graph.output_value(PortRef::new(block, 0)).unwrap();
        assert_eq!(value.type_id(), TypeId(0));
        assert_eq!(value.as_data().unwrap().tag(), "x");
    }
    assert!(!graph.registry().contains(TypeId(1)));
    assert!(graph.is_consistent());
}

#[test]
fn duplicate_block_captions_get_suffixes() {
    let mut graph = FlowGraph::new();
    graph.add_block(BlockKind::SplitData);
    let second = graph.add_block(BlockKind::SplitData);
    assert_eq!(graph.block(second).unwrap().caption(), "split_data_2");
}

#[test]
fn inverted_signature_stays_valid() {
    let sig = Signature::new([TypeId(0), TypeId(1)], [TypeId(2)]);
    let inverse = sig.inverted();
    assert_eq!(inverse, Signature::new([TypeId(2)], [TypeId(0), TypeId(1)]));
    assert!(sig.is_valid() && inverse.is_valid());
}

#[test]
fn renaming_to_a_freed_caption_is_allowed() {
    let mut graph = FlowGraph::new();
    let a = graph.add_block(BlockKind::Composer);
    let b = graph.add_block(BlockKind::Composer);
    assert_eq!(graph.block(b).unwrap().caption(), "composer_2");

    graph.set_caption(a, "chain").unwrap();
    assert_eq!(graph.set_caption(b, "composer").unwrap(), "composer");
    assert_eq!(graph.set_caption(b, "chain").unwrap(), "chain_2");
}

#[test]
fn trainer_pipeline_produces_typed_model() {
    let mut graph = FlowGraph::new();
    let features = data_source(&mut graph, "features.csv");
    let target = data_source(&mut graph, "target.csv");
    let split_x = graph.add_block(BlockKind::SplitData);
    let trainer = graph.add_block(BlockKind::Trainer);

    graph
        .connect(PortRef::new(features, 0), PortRef::new(split_x, 0))
        .unwrap();
    graph
        .connect(PortRef::new(target, 0), PortRef::new(split_x, 1))
        .unwrap();
    graph
        .connect(PortRef::new(split_x, 0), PortRef::new(trainer, 0))
        .unwrap();
    graph
        .connect(PortRef::new(split_x, 2), PortRef::new(trainer, 1))
        .unwrap();

    let x = output_type(&graph, features, 0);
    let y = output_type(&graph, target, 0);
    assert_eq!(function_output(&graph, trainer, 0), Signature::new([x], [y]));
    assert_eq!(
        graph.port_caption(trainer, Direction::Input, 0),
        Some("features_train")
    );

    // Merging the target into the feature type reaches the trainer's model.
    graph.bind(y, "features");
    assert_eq!(function_output(&graph, trainer, 0), Signature::new([x], [x]));
    assert!(graph.is_consistent());
}

#[test]
fn transform_round_trip_signatures() {
    let mut graph = FlowGraph::new();
    let features = data_source(&mut graph, "features.csv");
    let transform = graph.add_block(BlockKind::Transform);
    let composer = graph.add_block(BlockKind::Composer);
    graph.set_input_count(composer, 2).unwrap();

    graph
        .connect(PortRef::new(features, 0), PortRef::new(transform, 0))
        .unwrap();
    graph
        .connect(PortRef::new(transform, 0), PortRef::new(composer, 0))
        .unwrap();
    graph
        .connect(PortRef::new(transform, 1), PortRef::new(composer, 1))
        .unwrap();

    let encode = function_output(&graph, transform, 0);
    let composed = function_output(&graph, composer, 0);
    assert_eq!(composed.inputs, encode.inputs);
    assert_eq!(composed.outputs, encode.inputs);
}

#[test]
fn shrinking_composer_drops_connection_and_recomposes() {
    let mut graph = FlowGraph::new();
    let features = data_source(&mut graph, "features.csv");
    let transform = graph.add_block(BlockKind::Transform);
    let composer = graph.add_block(BlockKind::Composer);
    graph.set_input_count(composer, 2).unwrap();
    graph
        .connect(PortRef::new(features, 0), PortRef::new(transform, 0))
        .unwrap();
    graph
        .connect(PortRef::new(transform, 0), PortRef::new(composer, 0))
        .unwrap();
    graph
        .connect(PortRef::new(transform, 1), PortRef::new(composer, 1))
        .unwrap();

    graph.set_input_count(composer, 1).unwrap();
    let encode = function_output(&graph, transform, 0);
    assert_eq!(function_output(&graph, composer, 0), encode);
    assert!(!graph
        .block(transform)
        .unwrap()
        .output(1)
        .unwrap()
        .in_use());
    assert!(graph.is_consistent());
}

#[test]
fn trainer_arity_change_drops_extra_connections() {
    let mut graph = FlowGraph::new();
    let a = data_source(&mut graph, "a.csv");
    let b = data_source(&mut graph, "b.csv");
    let c = data_source(&mut graph, "c.csv");
    let trainer = graph.add_block(BlockKind::TorchTrainer);
    graph.set_trainer_arity(trainer, 2, 1).unwrap();

    for (i, src) in [a, b, c].into_iter().enumerate() {
        graph
            .connect(PortRef::new(src, 0), PortRef::new(trainer, i))
            .unwrap();
    }
    let ids: Vec<TypeId> = [a, b, c]
        .into_iter()
        .map(|src| output_type(&graph, src, 0))
        .collect();
    assert_eq!(
        function_output(&graph, trainer, 0),
        Signature::new([ids[0], ids[1]], [ids[2]])
    );

    graph.set_trainer_arity(trainer, 1, 1).unwrap();
    assert_eq!(graph.connection_count(), 2);
    assert_eq!(
        function_output(&graph, trainer, 0),
        Signature::new([ids[0]], [ids[1]])
    );
    assert!(matches!(
        graph.set_trainer_arity(trainer, 0, 1),
        Err(CoreError::PortCountBelowMinimum { .. })
    ));
}

#[test]
fn trainer_signature_tracks_every_port() {
    let mut graph = FlowGraph::new();
    let sources: Vec<BlockId> = ["a.csv", "b.csv", "c.csv", "d.csv"]
        .into_iter()
        .map(|f| data_source(&mut graph, f))
        .collect();
    let trainer = graph.add_block(BlockKind::Trainer);

    // Generic resizing would leave ports the signature does not cover.
    for result in [
        graph.add_port(trainer, Direction::Input, PortKind::Data, None).map(|_| ()),
        graph.set_port_count(trainer, Direction::Input, PortKind::Data, 4),
        graph.remove_port(trainer, Direction::Input, PortKind::Data).map(|_| ()),
    ] {
        assert!(matches!(result, Err(CoreError::UnsupportedOperation { .. })));
    }
    assert_eq!(graph.block(trainer).unwrap().port_count(Direction::Input), 2);

    graph.set_trainer_arity(trainer, 3, 1).unwrap();
    for (i, src) in sources.iter().enumerate() {
        graph
            .connect(PortRef::new(*src, 0), PortRef::new(trainer, i))
            .unwrap();
    }
    let ids: Vec<TypeId> = sources
        .iter()
        .map(|src| output_type(&graph, *src, 0))
        .collect();
    let block = graph.block(trainer).unwrap();
    assert_eq!(block.inputs().len(), block.signature().len());
    assert_eq!(
        function_output(&graph, trainer, 0),
        Signature::new([ids[0], ids[1], ids[2]], [ids[3]])
    );
    assert!(graph.is_consistent());
}

#[test]
fn exported_function_imports_into_stable_ids() {
    let mut graph = FlowGraph::new();
    let fs = graph.add_block(BlockKind::FuncSource);
    let sensitivity = graph.add_block(BlockKind::SensitivityAnalysis);
    let artifact = ImportedFunction {
        name: "surrogate".into(),
        file_hash: "0f1e".into(),
        inputs: vec![7],
        outputs: vec![9],
    };
    let signature = graph.import_function(fs, artifact.clone()).unwrap();
    graph
        .connect(PortRef::new(fs, 0), PortRef::new(sensitivity, 0))
        .unwrap();
    assert_eq!(
        graph.block(sensitivity).unwrap().port_count(Direction::Output),
        4
    );
    assert_eq!(output_type(&graph, sensitivity, 0), signature.inputs[0]);
    assert_eq!(output_type(&graph, sensitivity, 3), signature.outputs[0]);

    // Reimporting into the same block keeps the ids and the connection.
    assert_eq!(graph.import_function(fs, artifact).unwrap(), signature);
    assert_eq!(graph.connection_count(), 1);

    assert!(matches!(
        graph.import_function(sensitivity, ImportedFunction {
            name: "x".into(),
            file_hash: "h".into(),
            inputs: vec![0],
            outputs: vec![1],
        }),
        Err(CoreError::UnsupportedOperation { .. })
    ));
}

#[test]
fn events_report_merges_and_caption_changes() {
    let mut graph = FlowGraph::new();
    let x = data_source(&mut graph, "x.csv");
    let y = data_source(&mut graph, "y.csv");
    graph.take_events();

    let outcome = graph.bind(output_type(&graph, y, 0), "x");
    assert!(matches!(outcome, BindOutcome::Merged { .. }));
    let events = graph.take_events();
    assert!(events.contains(&GraphEvent::TypesMerged {
        kept: TypeId(0),
        removed: TypeId(1)
    }));
    assert!(events.contains(&GraphEvent::OutputCaptionChanged {
        port: PortRef::new(y, 0),
        caption: "x_2".into()
    }));
    assert!(!events
        .iter()
        .any(|e| matches!(e, GraphEvent::OutputCaptionChanged { port, .. } if port.block == x)));
}
