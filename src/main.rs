use clap::Parser;
use filetime::{FileTime, set_file_times};
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

const IMAGE_INPUTS_DIR: &str = "image_inputs";
const TRAJECTORY_DIR: &str = "trajectory";
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp", "tiff"];

/// Names without a numeric prefix rank as if prefixed with this number.
const NO_PREFIX_RANK: &str = "1000000000";

static NUM_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]+)").expect("Invalid regex for numeric prefix"));

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Reformat dataset: move/copy images from image_inputs -> trajectory",
    long_about = None
)]
struct Args {
    /// Root folder containing task_id subfolders (e.g. dataset_origin)
    dataset_root: PathBuf,
    /// Move files instead of copying (default: copy)
    #[arg(long = "move")]
    move_files: bool,
    /// Show what would be done without changing files
    #[arg(long)]
    dry_run: bool,
    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Error)]
enum ReorgError {
    #[error("dataset_root not found or not a directory: {}", .0.display())]
    RootNotFound(PathBuf),

    #[error("No task folders found under {}", .0.display())]
    NoTaskFolders(PathBuf),

    #[error("failed to {action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
#[error("{action} {} -> {}: {source}", .src.display(), .dest.display())]
struct TransferError {
    action: &'static str,
    src: PathBuf,
    dest: PathBuf,
    #[source]
    source: io::Error,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum TransferMode {
    #[default]
    Copy,
    Move,
}

impl TransferMode {
    fn verb(self) -> &'static str {
        match self {
            TransferMode::Copy => "copy",
            TransferMode::Move => "move",
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Options {
    mode: TransferMode,
    dry_run: bool,
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskOutcome {
    MissingInputs,
    EmptyInputs,
    Processed { transferred: usize, failed: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct RunSummary {
    processed: usize,
    skipped: usize,
    transferred: usize,
    failed: usize,
}

/// Numeric prefix (leading zeros stripped) compared by digit count, then digits,
/// then the full file name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SortKey {
    digit_count: usize,
    digits: String,
    name: String,
}

fn extract_sort_key(name: &str) -> SortKey {
    let digits = NUM_PREFIX_RE
        .captures(name)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().trim_start_matches('0'))
        .unwrap_or(NO_PREFIX_RANK);

    SortKey {
        digit_count: digits.len(),
        digits: digits.to_string(),
        name: name.to_string(),
    }
}

fn file_name_lossy(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Direct image children of `folder`, in processing order. Does not recurse.
fn gather_images(folder: &Path) -> io::Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for entry in fs::read_dir(folder)? {
        let path = entry?.path();
        if path.is_file() && is_image_file(&path) {
            images.push(path);
        }
    }
    images.sort_by_cached_key(|p| extract_sort_key(&file_name_lossy(p)));
    Ok(images)
}

fn destination_name(index: usize, source: &Path) -> String {
    let ext = source
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default();
    format!("step_{index}_screenshot{ext}")
}

// fs::copy carries permissions over; timestamps need to be set explicitly.
fn copy_with_times(source: &Path, dest: &Path) -> io::Result<()> {
    let bytes = fs::copy(source, dest)?;
    let meta = fs::metadata(source)?;
    let atime = FileTime::from_last_access_time(&meta);
    let mtime = FileTime::from_last_modification_time(&meta);
    set_file_times(dest, atime, mtime)?;
    debug!("copied {} bytes {} -> {}", bytes, source.display(), dest.display());
    Ok(())
}

fn copy_then_remove(source: &Path, dest: &Path) -> io::Result<()> {
    copy_with_times(source, dest)?;
    fs::remove_file(source)
}

fn move_file(source: &Path, dest: &Path) -> io::Result<()> {
    match fs::rename(source, dest) {
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            debug!("rename across filesystems, copying {}", source.display());
            copy_then_remove(source, dest)
        }
        result => result,
    }
}

fn transfer(source: &Path, dest: &Path, mode: TransferMode) -> Result<(), TransferError> {
    let (result, action) = match mode {
        TransferMode::Copy => (copy_with_times(source, dest), "copying"),
        TransferMode::Move => (move_file(source, dest), "moving"),
    };
    result.map_err(|source_err| TransferError {
        action,
        src: source.to_path_buf(),
        dest: dest.to_path_buf(),
        source: source_err,
    })
}

/// Removes `dir` if it has no entries left. Failures are ignored.
fn remove_if_empty(dir: &Path) -> bool {
    match fs::read_dir(dir).map(|mut entries| entries.next().is_none()) {
        Ok(true) => match fs::remove_dir(dir) {
            Ok(()) => true,
            Err(e) => {
                debug!("could not remove empty folder {}: {}", dir.display(), e);
                false
            }
        },
        _ => false,
    }
}

fn transfer_progress(len: usize, options: &Options) -> ProgressBar {
    if options.dry_run {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    let label = match options.mode {
        TransferMode::Copy => "Copying",
        TransferMode::Move => "Moving",
    };
    let template = format!(
        "{{spinner:.green}} [{{elapsed_precise}}] [{{wide_bar:.cyan/blue}}] {{pos}}/{{len}} {label} files..."
    );
    if let Ok(style) = ProgressStyle::default_bar().template(&template) {
        pb.set_style(style);
    }
    pb
}

fn process_task(task_folder: &Path, options: &Options) -> Result<TaskOutcome, ReorgError> {
    let task_name = file_name_lossy(task_folder);
    let inputs = task_folder.join(IMAGE_INPUTS_DIR);
    if !inputs.is_dir() {
        println!("  [skip] no {IMAGE_INPUTS_DIR} in {task_name}");
        return Ok(TaskOutcome::MissingInputs);
    }

    let trajectory = task_folder.join(TRAJECTORY_DIR);
    if !options.dry_run {
        fs::create_dir_all(&trajectory).map_err(|source| ReorgError::Io {
            action: "create",
            path: trajectory.clone(),
            source,
        })?;
    }

    let images = gather_images(&inputs).map_err(|source| ReorgError::Io {
        action: "read",
        path: inputs.clone(),
        source,
    })?;
    if images.is_empty() {
        println!("  [skip] {IMAGE_INPUTS_DIR} exists but no images found in {task_name}");
        return Ok(TaskOutcome::EmptyInputs);
    }

    println!(
        "  processing {task_name}: {} image(s) -> {TRAJECTORY_DIR}/",
        images.len()
    );

    let verb = options.mode.verb();
    let (mut transferred, mut failed) = (0, 0);
    let pb = transfer_progress(images.len(), options);

    for (index, source) in images.iter().enumerate() {
        let new_name = destination_name(index, source);
        let source_name = file_name_lossy(source);
        debug!("step {} <- {}", index, source.display());

        if options.dry_run {
            println!("    [dry-run] {verb} {source_name} -> {TRAJECTORY_DIR}/{new_name}");
            continue;
        }

        match transfer(source, &trajectory.join(&new_name), options.mode) {
            Ok(()) => {
                transferred += 1;
                if options.verbose {
                    pb.suspend(|| println!("    {verb} {source_name} -> {TRAJECTORY_DIR}/{new_name}"));
                }
            }
            Err(e) => {
                failed += 1;
                pb.suspend(|| println!("    [error] {e}"));
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    if !options.dry_run && options.mode == TransferMode::Move && remove_if_empty(&inputs) {
        println!("    removed empty folder {}", inputs.display());
    }

    Ok(TaskOutcome::Processed { transferred, failed })
}

/// Non-hidden immediate subdirectories of `root`, sorted by name.
fn find_task_folders(root: &Path) -> Result<Vec<PathBuf>, ReorgError> {
    if !root.is_dir() {
        return Err(ReorgError::RootNotFound(root.to_path_buf()));
    }
    let read_err = |source| ReorgError::Io {
        action: "read",
        path: root.to_path_buf(),
        source,
    };

    let mut tasks = Vec::new();
    for entry in fs::read_dir(root).map_err(read_err)? {
        let entry = entry.map_err(read_err)?;
        let path = entry.path();
        if !entry.file_name().to_string_lossy().starts_with('.') && path.is_dir() {
            tasks.push(path);
        }
    }

    if tasks.is_empty() {
        return Err(ReorgError::NoTaskFolders(root.to_path_buf()));
    }
    tasks.sort();
    Ok(tasks)
}

fn run(root: &Path, options: &Options) -> Result<RunSummary, ReorgError> {
    let tasks = find_task_folders(root)?;
    println!("Found {} task folder(s) under {}", tasks.len(), root.display());

    let mut summary = RunSummary::default();
    for task in &tasks {
        let name = file_name_lossy(task);
        println!("Processing task folder: {name}");

        match process_task(task, options) {
            Ok(TaskOutcome::Processed { transferred, failed }) => {
                summary.processed += 1;
                summary.transferred += transferred;
                summary.failed += failed;
            }
            Ok(TaskOutcome::MissingInputs | TaskOutcome::EmptyInputs) => summary.skipped += 1,
            Err(e) => {
                debug!("task {} skipped after error", name);
                println!("  [error] {e}");
                summary.skipped += 1;
            }
        }
    }

    println!("Done.");
    Ok(summary)
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "trajectory_sorter=debug"
    } else {
        "trajectory_sorter=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let options = Options {
        mode: if args.move_files {
            TransferMode::Move
        } else {
            TransferMode::Copy
        },
        dry_run: args.dry_run,
        verbose: args.verbose,
    };

    match run(&args.dataset_root, &options) {
        Ok(summary) => {
            debug!(
                "{} task(s) processed, {} skipped, {} file(s) transferred",
                summary.processed, summary.skipped, summary.transferred
            );
            if summary.failed > 0 {
                println!(
                    "{} file(s) failed to {}; see [error] lines above.",
                    summary.failed,
                    options.mode.verb()
                );
            }
        }
        // Structural problems with the root are reported, not treated as a crash.
        Err(e) => println!("{e}"),
    }
}
