use std::io::Read;

use clap::Parser as ClapParser;
use quill_bytecode::image;
use quill_vm::{Vm, VmConfig};
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod demo;

fn main() {
    let opt = Opt::parse();
    init_logging(opt.trace);

    if let Some(out) = &opt.emit_demo {
        let def = demo::build(10).unwrap_or_else(|errors| {
            for e in errors {
                eprintln!("{}", e);
            }
            fail("failed to build the demo")
        });
        if let Err(e) = std::fs::write(out, image::encode(&def)) {
            fail(&format!("cannot write {}: {}", out, e));
        }
        return;
    }

    let bytes = match &opt.file {
        Some(f) => {
            std::fs::read(f).unwrap_or_else(|e| fail(&format!("cannot read {}: {}", f, e)))
        }
        None => {
            let mut buf = vec![];
            if let Err(e) = std::io::stdin().lock().read_to_end(&mut buf) {
                fail(&format!("cannot read stdin: {}", e));
            }
            buf
        }
    };
    let def = image::decode(&bytes).unwrap_or_else(|e| fail(&e.to_string()));

    if opt.disasm {
        print!("{}", def);
        return;
    }

    let defaults = VmConfig::default();
    let config = VmConfig {
        gc_threshold: opt.gc_threshold.unwrap_or(defaults.gc_threshold),
        max_call_depth: opt.max_call_depth.unwrap_or(defaults.max_call_depth),
        ..defaults
    };
    debug!(?config, "starting runtime");
    let mut vm = Vm::new(config);
    vm.load_corelib();

    let proto = vm
        .load(&def)
        .unwrap_or_else(|e| fail(&format!("invalid bytecode: {}", e)));
    match vm.run(&proto) {
        Ok(v) => println!("{}", v),
        Err(report) => {
            eprintln!("{}", report);
            std::process::exit(1);
        }
    }
}

fn fail(msg: &str) -> ! {
    eprintln!("error: {}", msg);
    std::process::exit(1)
}

fn init_logging(trace: bool) {
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    if trace {
        filter = filter.add_directive("quill_vm=trace".parse().expect("directive is well-formed"));
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[derive(clap::Parser)]
#[clap(about, version, author)]
struct Opt {
    /// The bytecode image to run. Reads standard input if omitted.
    file: Option<String>,

    /// Print the disassembly of the image instead of running it.
    #[clap(long)]
    disasm: bool,

    /// Log every dispatched instruction.
    #[clap(long)]
    trace: bool,

    /// Tracked allocations between automatic collections.
    #[clap(long)]
    gc_threshold: Option<usize>,

    /// Maximum number of frames in one fiber.
    #[clap(long)]
    max_call_depth: Option<usize>,

    /// Write the built-in generator demo as an image to this path and exit.
    #[clap(long, value_name = "OUT")]
    emit_demo: Option<String>,
}
