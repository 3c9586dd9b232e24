use clap::{Args as ClapArgs, Parser, Subcommand};
use std::fmt::Display;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use ocodec_core::{Error, Format, Registry, SeekOptions, Value, WriteFormat};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "ocodec",
    about = "Dump, convert and query bin / bplist / json documents",
    version
)]
struct Cli {
    /// Log decode/encode progress (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Print a document in the given format (hex dump for binary formats)
    Dump(DumpArgs),
    /// Re-encode a document into another format
    Convert(ConvertArgs),
    /// Print the value at a path such as .a[2].s
    Seek(SeekArgs),
    /// List children of the container at a path
    List(PathArgs),
    /// Set the value (raw JSON) at a path; prints or writes with --out
    Set(SetArgs),
    /// Remove a key or array element at a path; prints or writes with --out
    Remove(RemoveArgs),
    /// Show which formats recognise a file
    Probe(ProbeArgs),
    /// List documents found under a directory
    Scan(ScanArgs),
}

#[derive(ClapArgs, Debug)]
struct DumpArgs {
    /// Document to read (path or file:// URL)
    path: String,
    /// Output format: bin, bplist or json
    #[arg(long, default_value = "json", value_parser = parse_format)]
    format: Format,
    /// Compact output without whitespace
    #[arg(long, default_value_t = false)]
    deflate: bool,
}

#[derive(ClapArgs, Debug)]
struct ConvertArgs {
    #[arg(long)]
    input: String,
    /// Created or truncated
    #[arg(long)]
    output: String,
    #[arg(long, value_parser = parse_format)]
    format: Format,
    #[arg(long, default_value_t = false)]
    deflate: bool,
}

#[derive(ClapArgs, Debug)]
struct SeekArgs {
    path: String,
    /// Path expression, e.g. .key[0].name
    #[arg(long = "path", value_name = "EXPR")]
    expr: String,
    /// Re-resolve strings of the form $expr from the root
    #[arg(long = "macro", default_value_t = false)]
    macro_enabled: bool,
    /// Nested macro expansions allowed
    #[arg(long, default_value_t = 32)]
    max_macro_depth: usize,
}

#[derive(ClapArgs, Debug)]
struct PathArgs {
    path: String,
    #[arg(long = "path", value_name = "EXPR", default_value = "")]
    expr: String,
}

#[derive(ClapArgs, Debug)]
struct SetArgs {
    path: String,
    #[arg(long = "path", value_name = "EXPR")]
    expr: String,
    /// New value as raw JSON (e.g., 123, true, "str", {"a":1})
    #[arg(long)]
    value: String,
    /// Output document; otherwise prints JSON to stdout
    #[arg(long)]
    out: Option<String>,
    /// Format for --out (defaults to the input's format)
    #[arg(long, value_parser = parse_format)]
    format: Option<Format>,
}

#[derive(ClapArgs, Debug)]
struct RemoveArgs {
    path: String,
    #[arg(long = "path", value_name = "EXPR")]
    expr: String,
    #[arg(long)]
    out: Option<String>,
    #[arg(long, value_parser = parse_format)]
    format: Option<Format>,
}

#[derive(ClapArgs, Debug)]
struct ProbeArgs {
    path: PathBuf,
}

#[derive(ClapArgs, Debug)]
struct ScanArgs {
    dir: PathBuf,
}

fn parse_format(s: &str) -> Result<Format, String> {
    s.parse::<Format>()
        .map_err(|_| format!("unknown format '{s}' (expected bin, bplist, xplist, xml or json)"))
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match cli.cmd {
        Cmd::Dump(a) => cmd_dump(a),
        Cmd::Convert(a) => cmd_convert(a),
        Cmd::Seek(a) => cmd_seek(a),
        Cmd::List(a) => cmd_list(a),
        Cmd::Set(a) => cmd_set(a),
        Cmd::Remove(a) => cmd_remove(a),
        Cmd::Probe(a) => cmd_probe(a),
        Cmd::Scan(a) => cmd_scan(a),
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn die(code: i32, msg: impl Display) -> ! {
    eprintln!("error: {}", msg);
    std::process::exit(code);
}

fn load(path: &str) -> Value {
    ocodec_core::read_from_url(path).unwrap_or_else(|e| die(2, e))
}

fn detect_format(path: &str) -> Option<Format> {
    let local = path.strip_prefix("file://").unwrap_or(path);
    let mut file = File::open(local).ok()?;
    Registry::default().detect(&mut file).ok().flatten()
}

/// JSON when possible; Data and Date fall back to the debug rendering.
fn render(v: &Value) -> String {
    match ocodec_core::to_dump_string(v, Format::Json) {
        Ok(s) => s.trim_end().to_string(),
        Err(Error::UnsupportedKind { .. }) => format!("{v:?}"),
        Err(e) => die(4, e),
    }
}

fn cmd_dump(args: DumpArgs) {
    let v = load(&args.path);
    let wf = WriteFormat {
        format: args.format,
        deflate: args.deflate,
    };
    let text = ocodec_core::to_dump_string(&v, wf).unwrap_or_else(|e| die(3, e));
    print!("{}", text);
    if !text.ends_with('\n') {
        println!();
    }
}

fn cmd_convert(args: ConvertArgs) {
    let v = load(&args.input);
    let wf = WriteFormat {
        format: args.format,
        deflate: args.deflate,
    };
    let n = ocodec_core::write_to_url(&v, &args.output, wf).unwrap_or_else(|e| die(3, e));
    tracing::info!(bytes = n, output = %args.output, "converted");
}

fn cmd_seek(args: SeekArgs) {
    let v = load(&args.path);
    let opts = SeekOptions {
        macro_enabled: args.macro_enabled,
        max_macro_depth: args.max_macro_depth,
    };
    let found = ocodec_core::seek_with(&v, &args.expr, &opts).unwrap_or_else(|e| die(3, e));
    println!("{}", render(&found));
}

fn cmd_list(args: PathArgs) {
    let v = load(&args.path);
    let children = ocodec_core::list_children(&v, &args.expr).unwrap_or_else(|e| die(3, e));
    for c in children {
        println!(
            "{}\t{:?}{}",
            c.key_or_index,
            c.kind,
            c.len.map(|n| format!("\t(len={})", n)).unwrap_or_default()
        );
    }
}

fn cmd_set(args: SetArgs) {
    let v = load(&args.path);
    let raw: serde_json::Value = serde_json::from_str(&args.value)
        .unwrap_or_else(|e| die(3, format!("invalid --value JSON: {}", e)));
    ocodec_core::set_at(&v, &args.expr, ocodec_core::from_json(&raw)).unwrap_or_else(|e| die(4, e));
    finish_edit(&v, &args.path, args.out.as_deref(), args.format);
}

fn cmd_remove(args: RemoveArgs) {
    let v = load(&args.path);
    ocodec_core::remove_at(&v, &args.expr).unwrap_or_else(|e| die(4, e));
    finish_edit(&v, &args.path, args.out.as_deref(), args.format);
}

fn finish_edit(v: &Value, input: &str, out: Option<&str>, format: Option<Format>) {
    let Some(out) = out else {
        println!("{}", render(v));
        return;
    };
    let format = format
        .or_else(|| detect_format(input))
        .unwrap_or(Format::Json);
    ocodec_core::write_to_url(v, out, format).unwrap_or_else(|e| die(5, e));
}

fn cmd_probe(args: ProbeArgs) {
    let mut file = File::open(&args.path).unwrap_or_else(|e| die(2, e));
    let mut head = Vec::new();
    (&mut file)
        .take(ocodec_core::registry::PROBE_LEN as u64)
        .read_to_end(&mut head)
        .unwrap_or_else(|e| die(2, e));
    let scores = Registry::default().probe(&head);
    if scores.is_empty() {
        die(1, format!("{}: no format recognised", args.path.display()));
    }
    for (format, score) in scores {
        println!("{}\t{}", format, score);
    }
}

fn cmd_scan(args: ScanArgs) {
    if !Path::new(&args.dir).is_dir() {
        die(2, format!("{} is not a directory", args.dir.display()));
    }
    for (path, format) in ocodec_core::find_documents(&Registry::default(), &args.dir) {
        println!("{}\t{}", path.display(), format);
    }
}
