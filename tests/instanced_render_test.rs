use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use instanced_ngin::{
    CapabilityOverrides, DrawMode, Geometry, Matrix3, RenderError, RenderStrategy, RendererConfig,
    SquareMatrix, Vector2,
    backend::{
        BufferHandle, ProgramHandle,
        headless::{Call, HeadlessBackend},
    },
    render::Renderer,
    shader::{BuiltinShaders, ShaderSources},
};

use crate::common::test_utils::{
    TRIANGLE, all_strategy_caps, caps, frame_calls, instanced_draws, renderer, renderer_with,
    test_config, triangle,
};

mod common;

#[test]
fn three_instances_of_one_triangle() {
    for capabilities in all_strategy_caps() {
        let mut renderer = renderer(capabilities);
        let geometry = triangle("shell");
        for x in [0.0, 10.0, 20.0] {
            renderer.scene().add_instance(&geometry, x, 0.0).unwrap();
        }

        let calls = frame_calls(&mut renderer);
        let draws = instanced_draws(&calls);
        let expected = match renderer.strategy() {
            RenderStrategy::FixedPipelinePerInstance => vec![
                Call::DrawArrays {
                    mode: DrawMode::Triangles,
                    count: 3,
                };
                3
            ],
            RenderStrategy::ShaderUniformBatch | RenderStrategy::ShaderTextureBufferPseudoInstance => {
                vec![Call::DrawArrays {
                    mode: DrawMode::Triangles,
                    count: 9,
                }]
            }
            RenderStrategy::ShaderUniformBatchInstanced | RenderStrategy::ShaderTextureBufferInstanced => {
                vec![Call::DrawArraysInstanced {
                    mode: DrawMode::Triangles,
                    count: 3,
                    instances: 3,
                }]
            }
        };
        assert_eq!(
            draws.into_iter().cloned().collect::<Vec<_>>(),
            expected,
            "{}",
            renderer.strategy()
        );
    }
}

#[test]
fn empty_geometries_are_not_drawn() {
    for capabilities in all_strategy_caps() {
        let mut renderer = renderer(capabilities);
        let live = triangle("live");
        let emptied = triangle("emptied");
        let hollow = Arc::new(Geometry::new("hollow", DrawMode::Triangles, Vec::new()));

        renderer.scene().add_instance(&live, 0.0, 0.0).unwrap();
        renderer.scene().add_instance(&emptied, 0.0, 0.0).unwrap();
        renderer.scene().add_instance(&hollow, 0.0, 0.0).unwrap();
        renderer.scene().remove_instance(1, 0).unwrap();

        let stats = {
            renderer.backend_mut().clear_calls();
            renderer.draw_frame().unwrap()
        };
        assert_eq!(stats.instanced.instances, 1, "{}", renderer.strategy());
        assert_eq!(renderer.compiled(2).and_then(|c| c.buffer), None);

        let binds: Vec<_> = renderer
            .backend()
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::BindVertexBuffer { .. }))
            .collect();
        assert_eq!(binds.len(), 1);
    }
}

#[test]
fn pseudo_instancing_replicates_the_shape_for_every_slot() {
    let mut renderer = renderer_with(caps(true, false, true), RendererConfig::default());
    assert_eq!(
        renderer.strategy(),
        RenderStrategy::ShaderTextureBufferPseudoInstance
    );
    let geometry = triangle("shell");
    renderer.scene().add_instance(&geometry, 0.0, 0.0).unwrap();
    renderer.draw_frame().unwrap();

    let compiled = renderer.compiled(0).unwrap().clone();
    assert_eq!(compiled.components, 3);
    assert_eq!(compiled.vertices_per_instance, 3);
    let data = renderer.backend().buffer(compiled.buffer.unwrap()).unwrap();
    assert_eq!(data.len(), 100_000 * 3 * 3);
    for (replica, vertices) in data.chunks_exact(9).enumerate() {
        for (vertex, chunk) in vertices.chunks_exact(3).enumerate() {
            assert_eq!(chunk[0], TRIANGLE[vertex * 2]);
            assert_eq!(chunk[1], TRIANGLE[vertex * 2 + 1]);
            assert_eq!(chunk[2], replica as f32);
        }
    }
}

#[test]
fn thirteen_hundred_instances_take_three_uniform_batches() {
    for capabilities in [caps(true, false, false), caps(true, true, false)] {
        let mut renderer = renderer(capabilities);
        let geometry = triangle("spark");
        for i in 0..1300 {
            renderer
                .scene()
                .add_instance(&geometry, i as f32, 0.0)
                .unwrap();
        }

        let calls = frame_calls(&mut renderer);
        let sizes: Vec<usize> = renderer.backend().batches().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![512, 512, 276]);
        assert_eq!(renderer.backend().batches()[2][0], [1024.0, 0.0]);

        let draws = instanced_draws(&calls);
        let expected: Vec<Call> = [512u32, 512, 276]
            .into_iter()
            .map(|n| {
                if renderer.strategy().hardware_instanced() {
                    Call::DrawArraysInstanced {
                        mode: DrawMode::Triangles,
                        count: 3,
                        instances: n,
                    }
                } else {
                    Call::DrawArrays {
                        mode: DrawMode::Triangles,
                        count: n * 3,
                    }
                }
            })
            .collect();
        assert_eq!(draws.into_iter().cloned().collect::<Vec<_>>(), expected);
    }
}

#[test]
fn smaller_batches_are_honoured() {
    let config = test_config().with_batch_size(100);
    let mut renderer = renderer_with(caps(true, true, false), config);
    let geometry = triangle("spark");
    for _ in 0..250 {
        renderer.scene().add_instance(&geometry, 0.0, 0.0).unwrap();
    }
    let stats = renderer.draw_frame().unwrap();
    assert_eq!(stats.instanced.batches, 3);
    assert_eq!(stats.instanced.instances, 250);
}

#[test]
fn dirty_geometry_recompiles_on_the_next_frame() {
    for capabilities in all_strategy_caps() {
        let mut renderer = renderer(capabilities);
        let geometry = triangle("crater");
        renderer.scene().add_instance(&geometry, 0.0, 0.0).unwrap();
        renderer.draw_frame().unwrap();
        assert!(!geometry.is_dirty());
        let first = renderer.compiled(0).unwrap().buffer;

        // Same size: the buffer is rewritten in place.
        geometry.set_vertices(vec![0.0, 0.0, 2.0, 0.0, 1.0, 2.0]);
        assert!(geometry.is_dirty());
        let calls = frame_calls(&mut renderer);
        assert!(!geometry.is_dirty());
        assert!(calls.iter().any(|c| matches!(c, Call::WriteVertexBuffer { reused: true, .. })));
        assert_eq!(renderer.compiled(0).unwrap().buffer, first);

        // Different size: reallocated.
        geometry.set_vertices(vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        geometry.set_draw_mode(DrawMode::TriangleStrip);
        let calls = frame_calls(&mut renderer);
        let compiled = renderer.compiled(0).unwrap();
        if renderer.strategy().requires_manual_indexing() {
            assert_eq!(compiled.vertices_per_instance, 6);
            assert_eq!(compiled.draw_mode, DrawMode::Triangles);
        } else {
            assert_eq!(compiled.vertices_per_instance, 4);
            assert_eq!(compiled.draw_mode, DrawMode::TriangleStrip);
        }
        assert!(calls.iter().any(|c| matches!(c, Call::WriteVertexBuffer { reused: false, .. })));
        assert_eq!(renderer.backend().live_buffers(), 1);

        // Clean geometry is not touched again.
        let calls = frame_calls(&mut renderer);
        assert!(!calls.iter().any(|c| matches!(c, Call::WriteVertexBuffer { .. })));
    }
}

#[test]
fn builder_runs_only_when_dirty_and_sees_the_view() {
    let builds = Arc::new(AtomicUsize::new(0));
    let counter = builds.clone();
    let geometry = Arc::new(Geometry::with_builder(
        "ground",
        DrawMode::TriangleStrip,
        move |view_width: f32, view_height: f32| {
            counter.fetch_add(1, Ordering::SeqCst);
            vec![0.0, 0.0, view_width, 0.0, 0.0, view_height / 2.0, view_width, view_height / 2.0]
        },
    ));

    let mut renderer = renderer(caps(true, true, true));
    renderer.draw_frame().unwrap();
    renderer.scene().add_instance(&geometry, 0.0, 0.0).unwrap();
    renderer.draw_frame().unwrap();
    renderer.draw_frame().unwrap();
    assert_eq!(builds.load(Ordering::SeqCst), 1);

    let buffer = renderer.compiled(0).unwrap().buffer.unwrap();
    assert_eq!(
        renderer.backend().buffer(buffer).unwrap(),
        &[0.0, 0.0, 100.0, 0.0, 0.0, 37.5, 100.0, 37.5][..]
    );

    geometry.mark_dirty();
    renderer.draw_frame().unwrap();
    assert_eq!(builds.load(Ordering::SeqCst), 2);
}

#[test]
fn geometry_without_instances_stays_dirty() {
    let mut renderer = renderer(caps(true, true, true));
    let geometry = triangle("unused");
    renderer.scene().add_instance(&geometry, 0.0, 0.0).unwrap();
    renderer.scene().remove_instance(0, 0).unwrap();

    let stats = renderer.draw_frame().unwrap();
    assert_eq!(stats.compiled, 0);
    assert!(geometry.is_dirty());
    assert!(renderer.compiled(0).is_none());
}

#[test]
fn texture_buffer_offsets_follow_live_counts() {
    for capabilities in [caps(true, false, true), caps(true, true, true)] {
        let mut renderer = renderer(capabilities);
        let shells = triangle("shells");
        let gone = triangle("gone");
        let sparks = triangle("sparks");
        for i in 0..3 {
            renderer.scene().add_instance(&shells, i as f32, 1.0).unwrap();
        }
        renderer.scene().add_instance(&gone, 0.0, 0.0).unwrap();
        renderer.scene().remove_instance(1, 0).unwrap();
        for i in 0..5 {
            renderer.scene().add_instance(&sparks, i as f32, 2.0).unwrap();
        }

        let calls = frame_calls(&mut renderer);
        let offsets: Vec<u32> = calls
            .iter()
            .filter_map(|c| match c {
                Call::SetPositionOffset(offset) => Some(*offset),
                _ => None,
            })
            .collect();
        assert_eq!(offsets, vec![0, 3]);
        assert!(calls.contains(&Call::WritePositions(8)));

        let positions = renderer.backend().positions();
        assert_eq!(positions[2], [2.0, 1.0]);
        assert_eq!(positions[3], [0.0, 2.0]);
        assert_eq!(positions[7], [4.0, 2.0]);
    }
}

#[test]
fn fixed_pipeline_translates_each_instance() {
    let mut renderer = renderer(caps(false, true, true));
    let geometry = triangle("shell");
    renderer.scene().add_instance(&geometry, 5.0, 6.0).unwrap();
    renderer.scene().add_instance(&geometry, 7.0, 8.0).unwrap();

    let calls = frame_calls(&mut renderer);
    let models: Vec<Matrix3<f32>> = calls
        .iter()
        .filter_map(|c| match c {
            Call::SetModel(m) => Some(*m),
            _ => None,
        })
        .collect();
    assert_eq!(
        models,
        vec![
            Matrix3::identity(),
            Matrix3::from_translation(Vector2::new(5.0, 6.0)),
            Matrix3::from_translation(Vector2::new(7.0, 8.0)),
            Matrix3::identity(),
        ]
    );
    assert!(calls.contains(&Call::UseProgram(None)));
}

#[test]
fn frame_uses_default_then_instancing_program() {
    let mut renderer = renderer(caps(true, true, true));
    let names: Vec<_> = [ProgramHandle(0), ProgramHandle(1)]
        .into_iter()
        .map(|p| renderer.backend().program_name(p).map(str::to_owned))
        .collect();
    assert_eq!(
        names,
        vec![Some("default".to_owned()), Some("instancing_texture".to_owned())]
    );

    let calls = frame_calls(&mut renderer);
    assert_eq!(calls.first(), Some(&Call::BeginFrame));
    assert_eq!(calls.last(), Some(&Call::EndFrame));
    let programs: Vec<_> = calls
        .iter()
        .filter(|c| matches!(c, Call::UseProgram(_)))
        .collect();
    assert_eq!(
        programs,
        vec![
            &Call::UseProgram(Some(ProgramHandle(0))),
            &Call::UseProgram(Some(ProgramHandle(1)))
        ]
    );
}

#[test]
fn overrides_downgrade_the_strategy() {
    let config = test_config().with_capabilities(CapabilityOverrides {
        disable_instancing: true,
        ..Default::default()
    });
    let renderer = renderer_with(caps(true, true, true), config);
    assert_eq!(
        renderer.strategy(),
        RenderStrategy::ShaderTextureBufferPseudoInstance
    );
    assert!(renderer.backend().calls().contains(&Call::Prepare {
        strategy: RenderStrategy::ShaderTextureBufferPseudoInstance,
        max_instances: 2048,
        batch_size: 512,
    }));
}

#[test]
fn failing_default_program_aborts_setup() {
    let backend = HeadlessBackend::new(caps(true, true, true)).fail_program("default");
    let err = Renderer::new(backend, test_config(), &BuiltinShaders).unwrap_err();
    assert!(matches!(
        err,
        RenderError::ShaderCompilation { ref program, .. } if program == "default"
    ));
}

#[test]
fn program_without_position_offset_aborts_setup() {
    let shaders = ShaderSources::new()
        .with("default", "projection model vertex")
        .with("instancing_texture", "projection vertex positionSampler");
    let err = Renderer::new(HeadlessBackend::new(caps(true, true, true)), test_config(), &shaders)
        .unwrap_err();
    assert!(matches!(
        err,
        RenderError::MissingShaderInput { ref program, ref name }
            if program == "instancing_texture" && name == "positionOffset"
    ));
}

#[test]
fn missing_program_source_aborts_setup() {
    let shaders = ShaderSources::new().with("default", "projection model vertex");
    let err = Renderer::new(HeadlessBackend::new(caps(true, false, false)), test_config(), &shaders)
        .unwrap_err();
    assert!(matches!(err, RenderError::ShaderCompilation { .. }));
}

#[test]
fn geometry_buffers_are_never_shared() {
    let mut renderer = renderer(caps(true, true, false));
    let a = triangle("a");
    let b = triangle("b");
    renderer.scene().add_instance(&a, 0.0, 0.0).unwrap();
    renderer.scene().add_instance(&b, 0.0, 0.0).unwrap();
    renderer.draw_frame().unwrap();

    let buffers: Vec<Option<BufferHandle>> = (0..2)
        .map(|id| renderer.compiled(id).and_then(|c| c.buffer))
        .collect();
    assert!(buffers.iter().all(Option::is_some));
    assert_ne!(buffers[0], buffers[1]);
}

#[test]
fn replicated_strips_never_join_instances() {
    let quad = vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0];
    let zigzag = vec![0.0, 0.0, 1.0, 1.0, 2.0, 0.0];
    for capabilities in [caps(true, false, false), caps(true, false, true)] {
        for (shape, mode, primitive) in [
            (quad.clone(), DrawMode::TriangleStrip, 3),
            (zigzag.clone(), DrawMode::LineStrip, 2),
        ] {
            let mut renderer = renderer(capabilities);
            let geometry = Arc::new(Geometry::new("strip", mode, shape));
            renderer.scene().add_instance(&geometry, 0.0, 0.0).unwrap();
            renderer.scene().add_instance(&geometry, 5.0, 5.0).unwrap();

            let calls = frame_calls(&mut renderer);
            let draws = instanced_draws(&calls);
            assert_eq!(draws.len(), 1);
            let Call::DrawArrays { mode: drawn, count } = draws[0] else {
                panic!("expected a plain draw, got {:?}", draws[0]);
            };
            assert!(matches!(drawn, DrawMode::Triangles | DrawMode::Lines));

            let compiled = renderer.compiled(0).unwrap();
            let buffer = renderer.backend().buffer(compiled.buffer.unwrap()).unwrap();
            let replicas: Vec<f32> = buffer
                .chunks_exact(3)
                .take(*count as usize)
                .map(|vertex| vertex[2])
                .collect();
            assert_eq!(replicas.len() % primitive, 0);
            for vertices in replicas.chunks(primitive) {
                assert!(
                    vertices.iter().all(|r| *r == vertices[0]),
                    "{mode:?} primitive spans replicas {vertices:?}"
                );
            }
            assert_eq!(replicas.first(), Some(&0.0));
            assert_eq!(replicas.last(), Some(&1.0));
        }
    }
}
