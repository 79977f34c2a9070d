// Render a scene description or a named demo to a PNG.
// Run with: cargo run --release --bin glint -- --demo cornell --frames 128 --out cornell.png

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use glint_gpu::{GpuContext, GpuTracer};
use glint_tracer::{demos, synthesize, CpuTracer, ImageBuffer, RenderConfig, Scene, SceneConfig};

const USAGE: &str = "Usage: glint [--scene <file.json> | --demo <name>] [--frames N] [--out file.png]
             [--width W] [--height H] [--bounces B] [--seed S] [--cpu] [--dump-shader <file>]";

/// Display gamma for PNG output
const GAMMA: f32 = 2.2;

#[derive(Debug, Default)]
struct Args {
    scene: Option<PathBuf>,
    demo: Option<String>,
    frames: Option<u32>,
    out: Option<PathBuf>,
    cpu: bool,
    dump_shader: Option<PathBuf>,
    width: Option<u32>,
    height: Option<u32>,
    bounces: Option<u32>,
    seed: Option<u64>,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Args> {
    let mut parsed = Args::default();
    let mut args = args.into_iter();
    while let Some(flag) = args.next() {
        let mut value = || args.next().with_context(|| format!("{flag} needs a value"));
        match flag.as_str() {
            "--scene" => parsed.scene = Some(PathBuf::from(value()?)),
            "--demo" => parsed.demo = Some(value()?),
            "--frames" => parsed.frames = Some(value()?.parse().context("--frames")?),
            "--out" => parsed.out = Some(PathBuf::from(value()?)),
            "--dump-shader" => parsed.dump_shader = Some(PathBuf::from(value()?)),
            "--width" => parsed.width = Some(value()?.parse().context("--width")?),
            "--height" => parsed.height = Some(value()?.parse().context("--height")?),
            "--bounces" => parsed.bounces = Some(value()?.parse().context("--bounces")?),
            "--seed" => parsed.seed = Some(value()?.parse().context("--seed")?),
            "--cpu" => parsed.cpu = true,
            "--help" | "-h" => {
                println!("{USAGE}");
                println!("Demos: {}", demos::NAMES.join(", "));
                std::process::exit(0);
            }
            other => bail!("unknown argument '{other}'\n{USAGE}"),
        }
    }
    if parsed.scene.is_some() && parsed.demo.is_some() {
        bail!("--scene and --demo are mutually exclusive");
    }
    Ok(parsed)
}

fn render_config(args: &Args) -> RenderConfig {
    let defaults = RenderConfig::default();
    RenderConfig {
        width: args.width.unwrap_or(defaults.width),
        height: args.height.unwrap_or(defaults.height),
        bounces: args.bounces.unwrap_or(defaults.bounces),
        frames: args.frames.unwrap_or(defaults.frames),
        seed: args.seed.unwrap_or(defaults.seed),
        ..defaults
    }
}

fn load_scene(args: &Args) -> Result<Scene> {
    if let Some(path) = &args.scene {
        let config = SceneConfig::load(path).with_context(|| format!("loading {}", path.display()))?;
        return Ok(config.build()?);
    }
    let name = args.demo.as_deref().unwrap_or("cornell");
    Ok(demos::demo(name)?)
}

fn write_png(image: &ImageBuffer, path: &Path) -> Result<()> {
    let bytes = image.to_rgba8(GAMMA);
    let png = image::RgbaImage::from_raw(image.width, image.height, bytes)
        .context("image buffer does not match its dimensions")?;
    png.save(path).with_context(|| format!("writing {}", path.display()))?;
    log::info!("Wrote {}", path.display());
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = parse_args(std::env::args().skip(1))?;
    let config = render_config(&args);
    let mut scene = load_scene(&args)?;
    config.apply(&mut scene);

    if let Some(path) = &args.dump_shader {
        let program = synthesize(&mut scene);
        std::fs::write(path, &program.source).with_context(|| format!("writing {}", path.display()))?;
        log::info!("Dumped program to {}", path.display());
    }

    let started = Instant::now();
    let image = if args.cpu {
        log::info!(
            "Rendering {} frames at {}x{} on the CPU",
            config.frames,
            config.width,
            config.height
        );
        let mut tracer = CpuTracer::new(&config);
        tracer.render(&mut scene, config.frames).clone()
    } else {
        log::info!(
            "Rendering {} frames at {}x{} on the GPU",
            config.frames,
            config.width,
            config.height
        );
        let context = GpuContext::new_blocking()?;
        let mut tracer = GpuTracer::new(context, &config);
        tracer.render(&mut scene, config.frames)?
    };
    log::info!(
        "Rendered in {:.2}s, mean radiance {:?}",
        started.elapsed().as_secs_f64(),
        image.mean()
    );

    let out = args.out.clone().unwrap_or_else(|| PathBuf::from("glint.png"));
    write_png(&image, &out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args> {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse_flags() {
        let parsed = args(&["--demo", "glass", "--frames", "16", "--cpu", "--out", "g.png"]).unwrap();
        assert_eq!(parsed.demo.as_deref(), Some("glass"));
        assert_eq!(parsed.frames, Some(16));
        assert!(parsed.cpu);
        assert_eq!(parsed.out, Some(PathBuf::from("g.png")));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(args(&["--frames"]).is_err());
        assert!(args(&["--frames", "many"]).is_err());
        assert!(args(&["--bogus"]).is_err());
        assert!(args(&["--scene", "a.json", "--demo", "sphere"]).is_err());
    }

    #[test]
    fn test_render_config_overrides() {
        let parsed = args(&["--width", "64", "--bounces", "2"]).unwrap();
        let config = render_config(&parsed);
        assert_eq!(config.width, 64);
        assert_eq!(config.height, 512);
        assert_eq!(config.bounces, 2);
    }
}
