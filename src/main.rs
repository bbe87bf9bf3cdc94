use arithjit::config::JitConfig;
use arithjit::jit::{self, CompiledMethod, RunOutcome, Simulator};
use arithjit::vm::{GenericRuntime, MethodListing, RuntimeBridge, Value};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum FormatArg {
    #[default]
    Human,
    Json,
}

#[derive(Parser)]
#[command(name = "arithjit")]
#[command(about = "Baseline JIT for arithmetic and relational bytecode", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every subcommand that compiles.
#[derive(Args, Debug, Clone)]
struct JitArgs {
    /// JIT configuration file (TOML)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Treat the target as lacking a hardware integer divide
    #[arg(long)]
    no_integer_divide: bool,

    /// Treat the target as lacking inline double-to-int32 truncation
    #[arg(long)]
    no_fp_truncate: bool,

    /// Treat the target as lacking double arithmetic
    #[arg(long)]
    no_floating_point: bool,

    /// Do not plant profiling counter increments
    #[arg(long)]
    no_profiling: bool,

    /// Trace compilation events
    #[arg(long)]
    trace: bool,
}

impl JitArgs {
    fn load_config(&self) -> Result<JitConfig, String> {
        let mut config = match &self.config {
            Some(path) => JitConfig::load(path)?,
            None => JitConfig::default(),
        };
        if self.no_integer_divide {
            config.capabilities.integer_divide = false;
        }
        if self.no_fp_truncate {
            config.capabilities.fp_truncate = false;
        }
        if self.no_floating_point {
            config.capabilities.floating_point = false;
        }
        if self.no_profiling {
            config.emit_profiling = false;
        }
        config.trace |= self.trace;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a method listing and report its fast and slow paths
    Compile {
        /// The method listing (TOML)
        listing: PathBuf,

        #[command(flatten)]
        jit: JitArgs,

        /// Output format (human or json)
        #[arg(long, value_enum, default_value = "human")]
        format: FormatArg,

        /// Dump the x86-64 code as hex
        #[arg(long)]
        hex: bool,
    },
    /// Compile a method listing and execute it in the simulator
    Run {
        /// The method listing (TOML)
        listing: PathBuf,

        #[command(flatten)]
        jit: JitArgs,

        /// Output format (human or json)
        #[arg(long, value_enum, default_value = "human")]
        format: FormatArg,
    },
    /// Print the slow-case shape table of a method listing
    Shapes {
        /// The method listing (TOML)
        listing: PathBuf,

        #[command(flatten)]
        jit: JitArgs,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Compile {
            listing,
            jit,
            format,
            hex,
        } => jit
            .load_config()
            .and_then(|config| compile_command(&listing, &config, format, hex)),
        Commands::Run {
            listing,
            jit,
            format,
        } => jit
            .load_config()
            .and_then(|config| run_command(&listing, &config, format)),
        Commands::Shapes { listing, jit } => jit
            .load_config()
            .and_then(|config| shapes_command(&listing, &config)),
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn init_logging(config: &JitConfig) {
    let filter = if config.trace {
        tracing_subscriber::EnvFilter::new("arithjit=trace")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_listing(path: &Path) -> Result<MethodListing, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    MethodListing::from_toml_str(&content).map_err(|e| format!("{}: {}", path.display(), e))
}

fn compile_listing(
    listing: &MethodListing,
    runtime: &mut GenericRuntime,
    config: &JitConfig,
) -> Result<CompiledMethod, String> {
    init_logging(config);
    let block = listing.to_code_block(runtime.heap_mut());
    jit::compile(&block, config).map_err(|e| format!("{}: {}", block.name, e))
}

#[derive(Serialize)]
struct SiteReport {
    bytecode_offset: u32,
    opcode: &'static str,
    shape: String,
    sites: usize,
}

fn site_reports(method: &CompiledMethod) -> Vec<SiteReport> {
    method
        .sites
        .iter()
        .map(|s| SiteReport {
            bytecode_offset: s.bytecode_offset,
            opcode: s.opcode.name(),
            shape: format!("{:?}", s.shape),
            sites: s.sites,
        })
        .collect()
}

#[derive(Serialize)]
struct NativeReport {
    code_size: usize,
    bytecode_offsets: Vec<usize>,
    call_sites: Vec<(usize, &'static str)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hex: Option<String>,
}

#[derive(Serialize)]
struct CompileReport {
    method: String,
    insns: usize,
    runtime_calls: usize,
    slow_cases: usize,
    instructions: Vec<SiteReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    x86_64: Option<NativeReport>,
}

#[cfg(feature = "x86_64")]
fn native_report(method: &CompiledMethod, hex: bool) -> Result<Option<NativeReport>, String> {
    use arithjit::jit::lower_x86_64;
    use arithjit::vm::OperationTable;

    let code = lower_x86_64::lower(method, &OperationTable::new())
        .map_err(|e| format!("{}: {}", method.name, e))?;
    Ok(Some(NativeReport {
        code_size: code.bytes.len(),
        bytecode_offsets: code.bytecode_offsets,
        call_sites: code
            .call_sites
            .iter()
            .map(|&(offset, op)| (offset, op.name()))
            .collect(),
        hex: hex.then(|| code.bytes.iter().map(|b| format!("{:02x}", b)).collect()),
    }))
}

#[cfg(not(feature = "x86_64"))]
fn native_report(_method: &CompiledMethod, _hex: bool) -> Result<Option<NativeReport>, String> {
    Ok(None)
}

fn compile_command(path: &Path, config: &JitConfig, format: FormatArg, hex: bool) -> Result<(), String> {
    let listing = load_listing(path)?;
    let mut runtime = GenericRuntime::new();
    let method = compile_listing(&listing, &mut runtime, config)?;

    let report = CompileReport {
        method: method.name.clone(),
        insns: method.code.len(),
        runtime_calls: method.code.call_count(),
        slow_cases: method.slow_case_count(),
        instructions: site_reports(&method),
        x86_64: native_report(&method, hex)?,
    };

    match format {
        FormatArg::Json => print_json(&report)?,
        FormatArg::Human => {
            println!("method {}", report.method);
            print_site_table(&report.instructions);
            println!(
                "{} insns, {} runtime calls, {} slow cases",
                report.insns, report.runtime_calls, report.slow_cases
            );
            if let Some(native) = &report.x86_64 {
                println!("x86-64: {} bytes", native.code_size);
                if let Some(hex) = &native.hex {
                    for line in hex.as_bytes().chunks(64) {
                        println!("  {}", String::from_utf8_lossy(line));
                    }
                }
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct CallReport {
    bytecode_offset: u32,
    op: &'static str,
    lhs: String,
    rhs: String,
    result: String,
}

#[derive(Serialize)]
struct CounterReport {
    bytecode_offset: u32,
    special: u32,
    slow_case: u32,
}

#[derive(Serialize)]
struct RunReport {
    method: String,
    steps: usize,
    slots: Vec<String>,
    calls: Vec<CallReport>,
    counters: Vec<CounterReport>,
}

fn describe(runtime: &GenericRuntime, value: Value) -> String {
    match runtime.heap().string_text(value) {
        Some(text) => format!("{:?}", text),
        None => value.to_string(),
    }
}

fn run_report(method: &CompiledMethod, runtime: &GenericRuntime, frame: &[Value], outcome: RunOutcome) -> RunReport {
    RunReport {
        method: method.name.clone(),
        steps: outcome.steps,
        slots: frame.iter().map(|&v| describe(runtime, v)).collect(),
        calls: outcome
            .calls
            .iter()
            .map(|call| CallReport {
                bytecode_offset: call.bytecode_offset,
                op: call.op.name(),
                lhs: describe(runtime, call.lhs),
                rhs: describe(runtime, call.rhs),
                result: if call.op.is_comparison() {
                    call.result.to_string()
                } else {
                    describe(runtime, Value::from_bits(call.result))
                },
            })
            .collect(),
        counters: method
            .profile
            .snapshot()
            .into_iter()
            .map(|(bytecode_offset, special, slow_case)| CounterReport {
                bytecode_offset,
                special,
                slow_case,
            })
            .collect(),
    }
}

fn run_command(path: &Path, config: &JitConfig, format: FormatArg) -> Result<(), String> {
    let listing = load_listing(path)?;
    let mut runtime = GenericRuntime::new();
    let method = compile_listing(&listing, &mut runtime, config)?;

    let mut frame = vec![Value::UNDEFINED; listing.slots];
    for input in &listing.inputs {
        let index = input
            .slot
            .slot_index()
            .filter(|&index| index < frame.len())
            .ok_or_else(|| format!("input {} is outside the frame of {} slots", input.slot, frame.len()))?;
        frame[index] = input.value.materialize(runtime.heap_mut()).value();
    }

    let outcome = Simulator::new(&method)
        .run(&mut frame, &mut runtime)
        .map_err(|e| format!("{}: {}", method.name, e))?;
    let report = run_report(&method, &runtime, &frame, outcome);

    match format {
        FormatArg::Json => print_json(&report)?,
        FormatArg::Human => {
            println!("method {} ({} steps)", report.method, report.steps);
            for (index, slot) in report.slots.iter().enumerate() {
                println!("  r{} = {}", index, slot);
            }
            if !report.calls.is_empty() {
                println!("runtime calls:");
                for call in &report.calls {
                    println!(
                        "  [{}] {}({}, {}) -> {}",
                        call.bytecode_offset, call.op, call.lhs, call.rhs, call.result
                    );
                }
            }
            if !report.counters.is_empty() {
                println!("counters:");
                for counter in &report.counters {
                    println!(
                        "  [{}] special={} slow_case={}",
                        counter.bytecode_offset, counter.special, counter.slow_case
                    );
                }
            }
        }
    }
    Ok(())
}

fn shapes_command(path: &Path, config: &JitConfig) -> Result<(), String> {
    let listing = load_listing(path)?;
    let mut runtime = GenericRuntime::new();
    let method = compile_listing(&listing, &mut runtime, config)?;
    print_site_table(&site_reports(&method));
    Ok(())
}

fn print_site_table(sites: &[SiteReport]) {
    for site in sites {
        println!(
            "  [{:>3}] {:<12} {:<40} {} slow case{}",
            site.bytecode_offset,
            site.opcode,
            site.shape,
            site.sites,
            if site.sites == 1 { "" } else { "s" }
        );
    }
}

fn print_json<T: Serialize>(report: &T) -> Result<(), String> {
    let json = serde_json::to_string_pretty(report).map_err(|e| format!("failed to encode report: {}", e))?;
    println!("{}", json);
    Ok(())
}
