use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc,
    },
    thread,
    time::Duration,
};

use instanced_ngin::{
    Deg, DrawMode, Drawable, Geometry, NodeHooks, RendererConfig, Scene, WindowEvent,
    data_structures::scene_graph::InlineShape,
    flow::{FlowConstructor, GraphicsFlow, WindowConfig, run},
};

const GRAVITY: f32 = -30.0;
const STEP: Duration = Duration::from_millis(10);

/// Tiny xorshift so the demo needs no extra crates.
struct Jitter(u32);

impl Jitter {
    fn next(&mut self) -> f32 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 17;
        self.0 ^= self.0 << 5;
        (self.0 % 10_000) as f32 / 10_000.0
    }
}

/// Runs on its own thread: spawns sparks at the emitter, moves them and
/// removes the ones that fell below the ground.
struct Simulation {
    scene: Scene,
    spark: Arc<Geometry>,
    velocities: Vec<[f32; 2]>,
    bursts: mpsc::Receiver<(f32, f32)>,
    running: Arc<AtomicBool>,
    jitter: Jitter,
}

impl Simulation {
    fn spawn(&mut self, x: f32, y: f32, count: usize) {
        for _ in 0..count {
            let vx = (self.jitter.next() - 0.5) * 30.0;
            let vy = 20.0 + self.jitter.next() * 30.0;
            match self.scene.add_instance(&self.spark, x, y) {
                Ok(_) => self.velocities.push([vx, vy]),
                Err(e) => {
                    log::debug!("{}", e);
                    break;
                }
            }
        }
    }

    fn step(&mut self, dt: f32) {
        let Some(id) = self.scene.geometry_id(&self.spark) else {
            return;
        };
        let velocities = &mut self.velocities;
        let fallen: Vec<usize> = self.scene.store().with_movables_mut(|movables| {
            let mut fallen = Vec::new();
            for (index, (movable, velocity)) in
                movables[id].iter_mut().zip(velocities.iter_mut()).enumerate()
            {
                velocity[1] += GRAVITY * dt;
                movable.x += velocity[0] * dt;
                movable.y += velocity[1] * dt;
                if movable.y < 0.0 {
                    fallen.push(index);
                }
            }
            fallen
        });
        // Highest index first so swap-removal never moves a pending index.
        for index in fallen.into_iter().rev() {
            if self.scene.remove_instance(id, index).is_ok() {
                self.velocities.swap_remove(index);
            }
        }
    }

    fn run(mut self) {
        let dt = STEP.as_secs_f32();
        while self.running.load(Ordering::Relaxed) {
            let view = self.scene.viewport();
            self.spawn(view.view_width / 2.0, 5.0, 40);
            while let Ok((x, y)) = self.bursts.try_recv() {
                self.spawn(x, y, 2000);
            }
            self.step(dt);
            thread::sleep(STEP);
        }
    }
}

/// Spins the turret a little every frame.
struct Tank {
    handle: Option<thread::JoinHandle<()>>,
    running: Arc<AtomicBool>,
    bursts: Option<mpsc::Sender<(f32, f32)>>,
    cursor: (f32, f32),
}

struct Hull;

impl NodeHooks for Hull {
    fn init(&mut self, node: &mut Drawable, view_width: f32, _view_height: f32) {
        let width = view_width / 20.0;
        node.shape = Some(InlineShape {
            draw_mode: DrawMode::TriangleStrip,
            vertices: vec![0.0, 0.0, width, 0.0, 0.0, width / 2.0, width, width / 2.0],
        });
        node.add_child(
            Drawable::new()
                .at(width / 2.0, width / 2.0)
                .with_shape(DrawMode::Lines, vec![0.0, 0.0, width, 0.0]),
        );
    }
}

impl GraphicsFlow for Tank {
    fn on_init(&mut self, scene: &Scene) {
        scene.register_drawable(Drawable::new().at(10.0, 0.0).with_hooks(Hull));

        let ground = Arc::new(Geometry::with_builder(
            "ground",
            DrawMode::TriangleStrip,
            |view_width: f32, _view_height: f32| vec![0.0, 0.0, view_width, 0.0, 0.0, 1.0, view_width, 1.0],
        ));
        if let Err(e) = scene.add_instance(&ground, 0.0, 0.0) {
            log::warn!("{}", e);
        }

        let (tx, rx) = mpsc::channel();
        self.bursts = Some(tx);
        let simulation = Simulation {
            scene: scene.clone(),
            spark: Arc::new(Geometry::new(
                "spark",
                DrawMode::Triangles,
                vec![0.0, 0.0, 0.4, 0.0, 0.2, 0.4],
            )),
            velocities: Vec::new(),
            bursts: rx,
            running: self.running.clone(),
            jitter: Jitter(0x9e37_79b9),
        };
        self.handle = Some(thread::spawn(move || simulation.run()));
    }

    fn on_tick(&mut self, scene: &Scene, dt: Duration) {
        scene.with_drawables(|nodes| {
            for turret in nodes.iter_mut().flat_map(|hull| hull.children_mut().iter_mut()) {
                turret.rotation = Deg((turret.rotation.0 + 45.0 * dt.as_secs_f32()) % 180.0);
            }
        });
    }

    fn on_window_events(&mut self, scene: &Scene, event: &WindowEvent) {
        match event {
            WindowEvent::CursorMoved { position, .. } => {
                self.cursor = scene.screen_to_view_coords(position.x as f32, position.y as f32);
            }
            WindowEvent::MouseInput { state, .. } if state.is_pressed() => {
                if let Some(bursts) = &self.bursts {
                    let _ = bursts.send(self.cursor);
                }
            }
            WindowEvent::CloseRequested => {
                self.running.store(false, Ordering::Relaxed);
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
            }
            _ => {}
        }
    }
}

fn main() -> anyhow::Result<()> {
    let tank: FlowConstructor = Box::new(|_scene| {
        Box::pin(async move {
            Box::new(Tank {
                handle: None,
                running: Arc::new(AtomicBool::new(true)),
                bursts: None,
                cursor: (0.0, 0.0),
            }) as Box<dyn GraphicsFlow>
        })
    });

    run(
        RendererConfig::default(),
        WindowConfig {
            title: "particles".to_owned(),
            ..Default::default()
        },
        vec![tank],
    )
}
