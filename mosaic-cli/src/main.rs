//! Stained-glass mosaic CLI
//!
//! Approximates an input image with up to 1000 movable sites, each owning a
//! connected region rendered in its weighted-median color, and improves the
//! fit with greedy relocation passes.
//!
//! ## YAML schedule file
//!
//! ```yaml
//! seed: 7
//! max_dim: 500
//! sites: 1000
//! iterations: 1000
//! passes:
//!   - op: kick
//!     n: 8
//!   - op: nudge
//!     n: 4
//! ```
//!
//! Run with: `mosaic -i img.jpg -o out.png --spec schedule.yaml`
//!
//! ## Inline passes
//!
//! Or use `-p` for quick inline schedules:
//!
//!   mosaic -i img.jpg -o out.png -p kick=8 -p nudge=4
//!
//! An implicit reseed runs first unless the schedule starts with one.
//!
//! ## Graceful interruption
//!
//! Press Ctrl+C to stop between passes; the mosaic reached so far is still
//! written.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;

use mosaic_core::{Optimizer, PartitionEngine, MAX_SITES, PASS_ITERATIONS};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Png,
    Gif,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum View {
    /// Representative region colors
    Mosaic,
    /// Score-per-pixel heat map
    Spp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassOp {
    Reseed,
    Kick,
    Nudge,
}

impl PassOp {
    fn parse(name: &str) -> anyhow::Result<Self> {
        match name {
            "reseed" => Ok(PassOp::Reseed),
            "kick" => Ok(PassOp::Kick),
            "nudge" => Ok(PassOp::Nudge),
            other => anyhow::bail!("unknown pass op '{}' (expected reseed, kick, or nudge)", other),
        }
    }

    fn label(self) -> &'static str {
        match self {
            PassOp::Reseed => "reseed",
            PassOp::Kick => "kick",
            PassOp::Nudge => "nudge",
        }
    }
}

/// One scheduled step: a pass kind and how many times to repeat it.
#[derive(Debug, Clone, Copy)]
struct Pass {
    op: PassOp,
    count: usize,
}

/// YAML schedule file format
#[derive(Debug, Deserialize)]
struct ScheduleSpec {
    #[serde(default)]
    seed: Option<u64>,
    #[serde(default)]
    max_dim: Option<u32>,
    #[serde(default)]
    sites: Option<usize>,
    #[serde(default)]
    iterations: Option<usize>,
    passes: Vec<PassSpec>,
}

/// A pass in the YAML spec
#[derive(Debug, Deserialize)]
struct PassSpec {
    op: String,
    #[serde(default = "default_pass_count")]
    n: usize,
}

fn default_pass_count() -> usize {
    1
}

impl PassSpec {
    fn to_pass(&self) -> anyhow::Result<Pass> {
        Ok(Pass {
            op: PassOp::parse(&self.op)?,
            count: self.n,
        })
    }
}

fn load_spec(path: &PathBuf) -> anyhow::Result<ScheduleSpec> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read spec file: {:?}", path))?;
    serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse spec file: {:?}", path))
}

/// Parse an inline pass spec like "kick=8" or "reseed"
fn parse_pass(spec: &str) -> anyhow::Result<Pass> {
    let (name, count) = match spec.split_once('=') {
        Some((name, n)) => (
            name.trim(),
            n.trim()
                .parse()
                .with_context(|| format!("invalid pass count in '{}'", spec))?,
        ),
        None => (spec.trim(), 1),
    };
    Ok(Pass {
        op: PassOp::parse(name)?,
        count,
    })
}

#[derive(Parser, Debug)]
#[command(name = "mosaic")]
#[command(about = "Render stained-glass mosaics", long_about = None)]
#[command(arg_required_else_help = true)]
struct Args {
    /// Input image path
    #[arg(short, long)]
    input: PathBuf,

    /// Output file path
    #[arg(short, long)]
    output: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value = "png")]
    format: OutputFormat,

    /// Longest edge the input is downscaled to before processing
    #[arg(long, default_value = "500")]
    max_dim: u32,

    /// Sites placed by the initial reseed
    #[arg(long, default_value_t = MAX_SITES)]
    sites: usize,

    /// Proposals per optimization pass
    #[arg(long, default_value_t = PASS_ITERATIONS)]
    iterations: usize,

    /// Random seed for reproducibility
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Optimization pass: reseed | kick[=n] | nudge[=n]
    #[arg(short = 'p', long = "pass")]
    pass: Vec<String>,

    /// YAML schedule file
    #[arg(long)]
    spec: Option<PathBuf>,

    /// Draw site positions as dots on the output
    #[arg(long)]
    show_sites: bool,

    /// What to render
    #[arg(long, value_enum, default_value = "mosaic")]
    view: View,
}

/// Per-pass report line for the end-of-run summary.
struct PassReport {
    label: &'static str,
    accepted: usize,
    proposed: usize,
    score: f64,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Set up SIGINT handler
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = interrupted.clone();
        ctrlc::set_handler(move || {
            interrupted.store(true, Ordering::SeqCst);
        })
        .expect("Failed to set Ctrl-C handler");
    }

    // Load spec file early (if provided); CLI args override its values
    let spec = args.spec.as_ref().map(load_spec).transpose()?;

    println!("Loading image: {:?}", args.input);
    let mut image = image::open(&args.input)
        .with_context(|| format!("failed to open {:?}", args.input))?
        .to_rgb8();
    let (orig_w, orig_h) = image.dimensions();

    let max_dim = if args.max_dim != 500 {
        args.max_dim
    } else {
        spec.as_ref().and_then(|s| s.max_dim).unwrap_or(500)
    };
    if orig_w.max(orig_h) > max_dim {
        let scale = max_dim as f64 / orig_w.max(orig_h) as f64;
        let w = ((orig_w as f64 * scale) as u32).max(1);
        let h = ((orig_h as f64 * scale) as u32).max(1);
        println!("Resizing {}x{} -> {}x{}", orig_w, orig_h, w, h);
        image = image::imageops::resize(&image, w, h, image::imageops::FilterType::Lanczos3);
    }
    let (width, height) = image.dimensions();
    println!("Image size: {}x{}", width, height);

    let seed = if args.seed != 0 {
        args.seed
    } else {
        spec.as_ref().and_then(|s| s.seed).unwrap_or(0)
    };
    let sites = if args.sites != MAX_SITES {
        args.sites
    } else {
        spec.as_ref().and_then(|s| s.sites).unwrap_or(MAX_SITES)
    };
    let iterations = if args.iterations != PASS_ITERATIONS {
        args.iterations
    } else {
        spec.as_ref()
            .and_then(|s| s.iterations)
            .unwrap_or(PASS_ITERATIONS)
    };

    // Build the pass schedule from the spec file, inline -p args, or default
    let mut passes: Vec<Pass> = if let Some(ref spec) = spec {
        spec.passes
            .iter()
            .map(PassSpec::to_pass)
            .collect::<anyhow::Result<_>>()?
    } else if !args.pass.is_empty() {
        args.pass
            .iter()
            .map(|s| parse_pass(s))
            .collect::<anyhow::Result<_>>()?
    } else {
        vec![
            Pass { op: PassOp::Kick, count: 8 },
            Pass { op: PassOp::Nudge, count: 4 },
        ]
    };
    if passes.first().map(|p| p.op) != Some(PassOp::Reseed) {
        passes.insert(0, Pass { op: PassOp::Reseed, count: 1 });
    }

    let mut engine = PartitionEngine::from_image(&image)?;
    let mut optimizer = Optimizer::new(seed).with_pass_iterations(iterations);
    println!("Using seed: {}", seed);

    let total_steps: usize = passes.iter().map(|p| p.count).sum();
    println!(
        "Running {} pass{} ({} proposals each)",
        total_steps,
        if total_steps == 1 { "" } else { "es" },
        iterations
    );

    let progress = ProgressBar::new(total_steps as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let mut gif = match args.format {
        OutputFormat::Gif => Some(GifWriter::create(&args.output, width, height)?),
        OutputFormat::Png => None,
    };

    let norm = width as f64 * height as f64 * 255.0 * 3.0;
    let mut reports: Vec<PassReport> = Vec::with_capacity(total_steps);
    let run_start = Instant::now();

    'run: for pass in &passes {
        for _ in 0..pass.count {
            if interrupted.load(Ordering::Relaxed) {
                progress.abandon_with_message("Interrupted");
                eprintln!(
                    "Interrupted after {} of {} passes, writing partial output...",
                    reports.len(),
                    total_steps
                );
                break 'run;
            }

            let (accepted, proposed) = match pass.op {
                PassOp::Reseed => {
                    let placed = optimizer.reseed(&mut engine, sites);
                    (placed, placed)
                }
                PassOp::Kick => {
                    let stats = optimizer.kick_pass(&mut engine);
                    (stats.accepted, stats.proposed)
                }
                PassOp::Nudge => {
                    let stats = optimizer.nudge_pass(&mut engine);
                    (stats.accepted, stats.proposed)
                }
            };
            let score = engine.total_score() / norm;
            reports.push(PassReport {
                label: pass.op.label(),
                accepted,
                proposed,
                score,
            });

            if let Some(ref mut gif) = gif {
                let frame = render_output(&engine, args.view, args.show_sites);
                gif.write_frame(frame.as_raw())?;
            }

            progress.set_message(format!("score {:.6}", score));
            progress.inc(1);
        }
    }

    if !interrupted.load(Ordering::Relaxed) {
        progress.finish_with_message("Done");
    }

    match gif {
        Some(gif) => gif.finish()?,
        None => {
            let frame = render_output(&engine, args.view, args.show_sites);
            frame.save(&args.output)?;
        }
    }

    let wall = run_start.elapsed();
    println!(
        "Output saved to: {:?} ({} sites, score {:.6}, {:.1}s)",
        args.output,
        engine.site_count(),
        engine.total_score() / norm,
        wall.as_secs_f64()
    );

    // Per-pass summary
    if !reports.is_empty() {
        println!("\nPass summary:");
        println!(
            "{:>3} {:>8} {:>9} {:>9} {:>10}",
            "#", "pass", "accepted", "proposed", "score"
        );
        for (i, report) in reports.iter().enumerate() {
            println!(
                "{:>3} {:>8} {:>9} {:>9} {:>10.6}",
                i + 1,
                report.label,
                report.accepted,
                report.proposed,
                report.score
            );
        }
    }
    Ok(())
}

/// Render the selected view, optionally with site markers.
fn render_output(engine: &PartitionEngine, view: View, show_sites: bool) -> image::RgbImage {
    let mut frame = match view {
        View::Mosaic => engine.render(),
        View::Spp => render_spp(engine),
    };
    if show_sites {
        draw_sites(&mut frame, &engine.sites());
    }
    frame
}

/// Score-per-pixel diagnostic: each region is colored along an HSL hue ramp
/// by how poorly its representative color fits; unassigned pixels stay black.
fn render_spp(engine: &PartitionEngine) -> image::RgbImage {
    let mut out = image::RgbImage::new(engine.width(), engine.height());
    let assignments = engine.assignments();
    for (p, px) in out.pixels_mut().enumerate() {
        let id = assignments[p];
        if id >= 0 {
            let spp = engine.region_score_per_pixel(id as usize).unwrap_or(0.0);
            *px = image::Rgb(hsl_to_rgb(spp * 0.5 + 0.5, 0.8, 0.6));
        }
    }
    out
}

/// HSL to RGB with the hue wrapped into [0, 1).
fn hsl_to_rgb(h: f64, s: f64, l: f64) -> [u8; 3] {
    let h = h.rem_euclid(1.0);
    if s == 0.0 {
        let v = (l * 255.0).round() as u8;
        return [v, v, v];
    }
    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;
    let channel = |t: f64| {
        let t = t.rem_euclid(1.0);
        let v = if t < 1.0 / 6.0 {
            p + (q - p) * 6.0 * t
        } else if t < 0.5 {
            q
        } else if t < 2.0 / 3.0 {
            p + (q - p) * (2.0 / 3.0 - t) * 6.0
        } else {
            p
        };
        (v * 255.0).round() as u8
    };
    [channel(h + 1.0 / 3.0), channel(h), channel(h - 1.0 / 3.0)]
}

/// Draw 3x3 black dots at each site position
fn draw_sites(image: &mut image::RgbImage, sites: &[(u32, u32)]) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    for &(sx, sy) in sites {
        for dy in -1..=1 {
            for dx in -1..=1 {
                let px = sx as i32 + dx;
                let py = sy as i32 + dy;
                if px >= 0 && px < w && py >= 0 && py < h {
                    image.put_pixel(px as u32, py as u32, image::Rgb([0, 0, 0]));
                }
            }
        }
    }
}

/// Streaming GIF encoder with one frame per optimization pass.
struct GifWriter {
    encoder: gif::Encoder<std::fs::File>,
    width: u16,
    height: u16,
    frame_delay: u16,
}

impl GifWriter {
    fn create(path: &std::path::Path, width: u32, height: u32) -> anyhow::Result<Self> {
        use gif::{Encoder, Repeat};
        let file = std::fs::File::create(path)
            .with_context(|| format!("failed to create {:?}", path))?;
        let mut encoder = Encoder::new(file, width as u16, height as u16, &[])?;
        encoder.set_repeat(Repeat::Infinite)?;
        Ok(Self {
            encoder,
            width: width as u16,
            height: height as u16,
            frame_delay: 50, // hundredths of a second per pass frame
        })
    }

    /// Write one frame's raw RGB pixel data, quantized to a 256-color
    /// palette with nearest-match fallback once the palette fills up.
    fn write_frame(&mut self, rgb_data: &[u8]) -> anyhow::Result<()> {
        let w = self.width as u32;
        let h = self.height as u32;

        let mut pixels: Vec<u8> = Vec::with_capacity((w * h) as usize);
        let mut palette: Vec<[u8; 3]> = Vec::new();

        for chunk in rgb_data.chunks_exact(3) {
            let rgb = [chunk[0], chunk[1], chunk[2]];
            let idx = palette.iter().position(|&c| c == rgb).unwrap_or_else(|| {
                if palette.len() < 256 {
                    palette.push(rgb);
                    palette.len() - 1
                } else {
                    palette
                        .iter()
                        .enumerate()
                        .min_by_key(|(_, c)| {
                            let dr = c[0] as i32 - rgb[0] as i32;
                            let dg = c[1] as i32 - rgb[1] as i32;
                            let db = c[2] as i32 - rgb[2] as i32;
                            dr * dr + dg * dg + db * db
                        })
                        .map(|(i, _)| i)
                        .unwrap_or(0)
                }
            });
            pixels.push(idx as u8);
        }

        while palette.len() < 256 {
            palette.push([0, 0, 0]);
        }
        let flat_palette: Vec<u8> = palette.iter().flat_map(|c| c.iter().copied()).collect();

        let mut frame =
            gif::Frame::from_palette_pixels(self.width, self.height, pixels, flat_palette, None);
        frame.delay = self.frame_delay;
        self.encoder.write_frame(&frame)?;
        Ok(())
    }

    /// The encoder flushes on drop.
    fn finish(self) -> anyhow::Result<()> {
        Ok(())
    }
}
