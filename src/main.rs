//! Pravaha CLI - Dataflow Engine for Media Filter Graphs
//!
//! This is a demonstration CLI for the Pravaha library.

use pravaha::prelude::*;
use std::sync::Arc;

fn main() {
    env_logger::init();

    println!("Pravaha - Dataflow Filter Graphs v{}", pravaha::VERSION);
    println!();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage(&args[0]);
        return;
    }

    match args[1].as_str() {
        "list" => list_filters(),
        "info" => {
            if args.len() < 3 {
                eprintln!("Error: Please specify a filter class");
                return;
            }
            filter_info(&args[2]);
        }
        "demo" => {
            let frames = args
                .get(2)
                .and_then(|s| s.parse::<i64>().ok())
                .unwrap_or(5);
            run_demo(frames);
        }
        "help" | "--help" | "-h" => print_usage(&args[0]),
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            print_usage(&args[0]);
        }
    }
}

fn print_usage(program: &str) {
    println!("Usage: {} <command> [options]", program);
    println!();
    println!("Commands:");
    println!("  list              List all registered filter classes");
    println!("  info <class>      Show ports and parameters of a filter class");
    println!("  demo [frames]     Run a demo graph (default: 5 frames)");
    println!("  help              Show this help message");
}

fn list_filters() {
    let registry = FilterRegistry::with_base_filters();

    println!("Registered filter classes ({} total):", registry.len());
    println!();
    for (class, entry) in registry.entries() {
        println!("  - {} - {}", class, entry.signature.description());
    }
}

fn filter_info(class: &str) {
    let registry = FilterRegistry::with_base_filters();

    match registry.signature(class) {
        Some(signature) => {
            println!("Filter class: {}", signature.class());
            println!();
            println!("Description:");
            println!("  {}", signature.description());
            println!();

            if !signature.inputs().is_empty() {
                println!("Inputs:");
                for port in signature.inputs() {
                    println!("  - {} {}", port.name(), port_details(port));
                }
                println!();
            }

            if !signature.outputs().is_empty() {
                println!("Outputs:");
                for port in signature.outputs() {
                    println!("  - {} {}", port.name(), port_details(port));
                }
                println!();
            }

            if !signature.protocol().is_empty() {
                println!("Parameters:");
                for (key, spec) in signature.protocol().iter() {
                    let need = if spec.is_optional() {
                        "optional"
                    } else {
                        "required"
                    };
                    let updatable = if spec.is_updatable() {
                        ", updatable"
                    } else {
                        ""
                    };
                    println!("  - {} [{}{}] {}", key, need, updatable, spec.kind());
                }
            }
        }
        None => {
            eprintln!("Unknown filter class: {}", class);
            eprintln!("Use 'list' to see registered classes.");
        }
    }
}

fn port_details(port: &PortSpec) -> String {
    let kind = match port.kind() {
        PortKind::Stream => "stream".to_string(),
        PortKind::Field => "field".to_string(),
        PortKind::Program { variable } => format!("program -> {}", variable),
    };
    let mut flags = Vec::new();
    if !port.is_blocking() {
        flags.push("non-blocking");
    }
    if port.is_optional() {
        flags.push("optional");
    }
    if flags.is_empty() {
        format!("[{}]", kind)
    } else {
        format!("[{}; {}]", kind, flags.join(", "))
    }
}

fn run_demo(frames: i64) {
    println!("Running demo: source -> pass -> callback sink, {} frames", frames);

    let backend = Arc::new(MemoryBackend::new());
    let manager = Arc::new(CachedFrameManager::new(backend.clone() as Arc<dyn StorageBackend>));
    let context = Arc::new(FilterContext::new(manager, backend));

    let registry = FilterRegistry::with_base_filters();
    let mut builder = GraphBuilder::new(&registry);

    let result = build_demo_graph(&mut builder, frames)
        .and_then(|_| SyncRunner::with_default_scheduler(context, builder.build()))
        .and_then(|mut runner| {
            runner.set_done_callback(|outcome| match outcome {
                RunOutcome::Finished => println!("Run finished."),
                RunOutcome::Blocked => println!("Run ended blocked."),
                RunOutcome::Stopped => println!("Run was stopped."),
                RunOutcome::Error(e) => eprintln!("Run failed: {}", e),
            });
            runner.run()
        });

    if let Err(e) = result {
        eprintln!("Demo failed: {}", e);
    }
}

fn build_demo_graph(builder: &mut GraphBuilder<'_>, frames: i64) -> EngineResult<()> {
    builder.add_filter(
        "object_source",
        "source",
        KeyValueMap::from_pairs([
            ("object", Value::from("tick")),
            ("max_frames", Value::Int(frames)),
        ]),
    )?;
    builder.add_filter("pass_through", "pass", KeyValueMap::new())?;

    let listener = Arc::new(FrameListener::new(|frame: &Frame| {
        if let Ok(Some(value)) = frame.value() {
            println!("  received frame: {:?}", value);
        }
    }));
    builder.add_filter(
        "callback_sink",
        "sink",
        KeyValueMap::from_pairs([("listener", Value::External(listener))]),
    )?;

    builder.connect("source", "frame", "pass", "frame")?;
    builder.connect("pass", "frame", "sink", "frame")?;
    Ok(())
}
