use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use wedge::{Config, Engine, Linker, Module, Store, Val, ValType};

#[derive(Parser)]
#[command(name = "wedge", about = "Run an export of a WebAssembly module")]
struct Cli {
    /// Path to a .wasm or .wat file.
    file: PathBuf,

    /// Export to call. Without it the module is only instantiated, which
    /// runs its start function.
    #[arg(long)]
    invoke: Option<String>,

    /// Arguments for the invoked export, parsed by its parameter types.
    #[arg(allow_hyphen_values = true)]
    args: Vec<String>,

    #[arg(long)]
    no_threads: bool,

    #[arg(long)]
    no_exceptions: bool,

    #[arg(long)]
    max_call_depth: Option<usize>,

    /// Abort after this many executed instructions.
    #[arg(long)]
    cost_limit: Option<u64>,

    /// Print execution statistics to stderr.
    #[arg(long)]
    stats: bool,
}

fn init_tracing() -> anyhow::Result<()> {
    tracing_subscriber::Registry::default()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .try_init()?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let cli = Cli::parse();
    let mut config = Config::new();
    config
        .threads(!cli.no_threads)
        .exceptions(!cli.no_exceptions)
        .cost_limit(cli.cost_limit);
    if let Some(depth) = cli.max_call_depth {
        config.max_call_depth(depth);
    }
    let engine = Engine::new(&config);

    let bytes = std::fs::read(&cli.file)
        .with_context(|| format!("reading {}", cli.file.display()))?;
    let module = if bytes.starts_with(b"\0asm") {
        Module::from_bytes(&engine, &bytes)?
    } else {
        Module::new(&engine, std::str::from_utf8(&bytes).context("module text is not utf-8")?)?
    };

    let mut store = Store::new(&engine);
    let instance = Linker::new(&engine).instantiate(&mut store, &module)?;

    if let Some(name) = &cli.invoke {
        let func = instance.get_func(&store, name)?;
        let params = store.func(func)?.ty().params().to_vec();
        if params.len() != cli.args.len() {
            bail!("`{name}` takes {} arguments, got {}", params.len(), cli.args.len());
        }
        let args = params
            .iter()
            .zip(&cli.args)
            .map(|(ty, arg)| parse_arg(*ty, arg))
            .collect::<anyhow::Result<Vec<_>>>()?;
        for result in store.invoke(func, &args)? {
            println!("{}", format_val(&result));
        }
    }

    if cli.stats {
        let stats = engine.statistics();
        eprintln!(
            "instructions: {}, host calls: {}",
            stats.instruction_count(),
            stats.host_call_count()
        );
    }
    Ok(())
}

fn parse_arg(ty: ValType, arg: &str) -> anyhow::Result<Val> {
    let val = match ty {
        ValType::I32 => {
            let v = arg.parse::<i32>();
            Val::I32(v.or_else(|_| arg.parse::<u32>().map(|v| v as i32))?)
        }
        ValType::I64 => {
            let v = arg.parse::<i64>();
            Val::I64(v.or_else(|_| arg.parse::<u64>().map(|v| v as i64))?)
        }
        ValType::F32 => Val::F32(arg.parse()?),
        ValType::F64 => Val::F64(arg.parse()?),
        other => bail!("cannot pass `{arg}` as {other}"),
    };
    Ok(val)
}

fn format_val(val: &Val) -> String {
    match val {
        Val::I32(v) => format!("{v}"),
        Val::I64(v) => format!("{v}"),
        Val::F32(v) => format!("{v}"),
        Val::F64(v) => format!("{v}"),
        Val::Ref(r) => format!("{r:?}"),
    }
}
