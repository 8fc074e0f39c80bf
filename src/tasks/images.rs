//! Image Optimizer.
//!
//! Development copies images byte for byte. Production compresses them:
//!
//! | Format     | Treatment                                               |
//! |------------|---------------------------------------------------------|
//! | PNG        | palette quantization (`imagequant`), indexed re-encode  |
//! | JPEG       | re-encode at `images.jpeg_quality`                      |
//! | GIF        | `images.gif_command` (gifsicle)                         |
//! | SVG, PDF   | unchanged                                               |
//!
//! The smaller of original and optimized bytes wins, so optimization never
//! grows a file. Every codec here is deterministic, which makes re-running
//! over an unchanged tree a no-op.

use super::BuildContext;
use crate::{
    config::ImagesConfig,
    exec,
    manifest::AssetKind,
    pipeline::{Step, StepReport, Transform},
    utils::{
        exec::GIF_FILTER,
        fs::{Outcome, write_if_changed},
    },
};
use anyhow::{Context, Result};
use image::{ImageFormat, codecs::jpeg::JpegEncoder};
use std::{fs, path::Path};

pub fn run(ctx: &BuildContext) -> StepReport {
    let images = ctx.collect(AssetKind::Images);
    ctx.process_all(Step::Transform(Transform::Images), &images, |path| {
        process(ctx, path)
    })
}

fn process(ctx: &BuildContext, path: &Path) -> Result<Outcome> {
    let dest = ctx.output().join(ctx.rel(path));
    let original = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;

    if !ctx.mode().is_production() {
        return write_if_changed(&dest, &original);
    }

    let optimized = optimize(path, &original, &ctx.config.build.images)?;
    write_if_changed(&dest, &optimized)
}

/// Compress one image, falling back to the original bytes when the
/// optimizer cannot reach the quality floor or does not save space.
pub fn optimize(path: &Path, original: &[u8], config: &ImagesConfig) -> Result<Vec<u8>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let candidate = match ext.as_str() {
        "png" => quantize_png(original, config)?,
        "jpg" | "jpeg" => Some(reencode_jpeg(original, config.jpeg_quality)?),
        "gif" => optimize_gif(path, config)?,
        _ => None,
    };

    Ok(match candidate {
        Some(bytes) if bytes.len() < original.len() => bytes,
        _ => original.to_vec(),
    })
}

/// Quantize to at most 256 colors. `None` if the quality floor cannot be met.
fn quantize_png(original: &[u8], config: &ImagesConfig) -> Result<Option<Vec<u8>>> {
    let rgba = image::load_from_memory_with_format(original, ImageFormat::Png)
        .context("Failed to decode PNG")?
        .to_rgba8();
    let (width, height) = rgba.dimensions();
    let pixels: Vec<imagequant::RGBA> = rgba
        .pixels()
        .map(|p| imagequant::RGBA::new(p[0], p[1], p[2], p[3]))
        .collect();

    let [min, target] = config.png_quality;
    let mut attr = imagequant::new();
    attr.set_quality(min, target)?;
    attr.set_speed(config.png_speed)?;

    let mut liq_image = attr.new_image(pixels, width as usize, height as usize, 0.0)?;
    let mut quantized = match attr.quantize(&mut liq_image) {
        Ok(result) => result,
        Err(imagequant::Error::QualityTooLow) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    quantized.set_dithering_level(1.0)?;
    let (palette, indexed) = quantized.remapped(&mut liq_image)?;

    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, width, height);
        encoder.set_color(png::ColorType::Indexed);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.set_compression(png::Compression::Best);
        encoder.set_palette(palette.iter().flat_map(|c| [c.r, c.g, c.b]).collect::<Vec<u8>>());
        encoder.set_trns(palette.iter().map(|c| c.a).collect::<Vec<u8>>());

        let mut writer = encoder.write_header()?;
        writer.write_image_data(&indexed)?;
        writer.finish()?;
    }
    Ok(Some(out))
}

fn reencode_jpeg(original: &[u8], quality: u8) -> Result<Vec<u8>> {
    let rgb = image::load_from_memory_with_format(original, ImageFormat::Jpeg)
        .context("Failed to decode JPEG")?
        .to_rgb8();

    let mut out = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, quality))?;
    Ok(out)
}

/// Run the GIF optimizer. A missing optimizer leaves GIFs unoptimized.
fn optimize_gif(path: &Path, config: &ImagesConfig) -> Result<Option<Vec<u8>>> {
    let Some(program) = config.gif_command.first() else {
        return Ok(None);
    };
    if which::which(program).is_err() {
        return Ok(None);
    }

    let output = exec!(filter=&GIF_FILTER; &config.gif_command; path)?;
    Ok(Some(output.stdout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::BuildMode,
        tasks::tests::{context, write_source},
    };
    use image::{Rgb, RgbImage, Rgba, RgbaImage};
    use std::io::Cursor;

    fn gradient_png() -> Vec<u8> {
        let img = RgbaImage::from_fn(96, 96, |x, y| {
            Rgba([(x * 2) as u8, (y * 2) as u8, ((x + y) % 256) as u8, 255])
        });
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
        buf
    }

    fn noisy_jpeg() -> Vec<u8> {
        let img = RgbImage::from_fn(64, 64, |x, y| Rgb([(x * 4) as u8, (y * 4) as u8, ((x ^ y) * 4) as u8]));
        let mut buf = Vec::new();
        img.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, 100)).unwrap();
        buf
    }

    #[test]
    fn test_development_copies_unchanged() {
        let (_dir, ctx) = context(BuildMode::Development, |_| {});
        let png = gradient_png();
        write_source(&ctx, "images/logo.png", &png);
        write_source(&ctx, "favicon.svg", "<svg/>");

        let report = run(&ctx);
        assert_eq!(report.written, 2);
        assert_eq!(fs::read(ctx.output().join("images/logo.png")).unwrap(), png);
        assert_eq!(fs::read(ctx.output().join("favicon.svg")).unwrap(), b"<svg/>");
    }

    #[test]
    fn test_production_png_never_grows() {
        let png = gradient_png();
        let config = ImagesConfig::default();
        let optimized = optimize(Path::new("a.png"), &png, &config).unwrap();

        assert!(optimized.len() <= png.len());
        let decoded = image::load_from_memory(&optimized).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (96, 96));
    }

    #[test]
    fn test_production_jpeg_reencoded() {
        let jpeg = noisy_jpeg();
        let config = ImagesConfig::default();
        let optimized = optimize(Path::new("photo.JPG"), &jpeg, &config).unwrap();

        assert!(optimized.len() <= jpeg.len());
        assert!(image::load_from_memory_with_format(&optimized, ImageFormat::Jpeg).is_ok());
    }

    #[test]
    fn test_vector_and_pdf_pass_through() {
        let config = ImagesConfig::default();
        let svg = b"<svg xmlns=\"http://www.w3.org/2000/svg\"/>";
        assert_eq!(optimize(Path::new("a.svg"), svg, &config).unwrap(), svg);
        assert_eq!(optimize(Path::new("a.pdf"), b"%PDF-1.4", &config).unwrap(), b"%PDF-1.4");
    }

    #[test]
    fn test_missing_gif_optimizer_passes_through() {
        let config = ImagesConfig {
            gif_command: vec!["kiln-no-such-gifsicle".into()],
            ..ImagesConfig::default()
        };
        let gif = b"GIF89a fake";
        assert_eq!(optimize(Path::new("a.gif"), gif, &config).unwrap(), gif);
    }

    #[test]
    fn test_corrupt_png_fails() {
        let config = ImagesConfig::default();
        assert!(optimize(Path::new("a.png"), b"not a png", &config).is_err());
    }

    #[test]
    fn test_production_idempotent() {
        let (_dir, ctx) = context(BuildMode::Production, |_| {});
        write_source(&ctx, "images/a.png", gradient_png());
        write_source(&ctx, "images/b.jpg", noisy_jpeg());

        let first = run(&ctx);
        assert!(first.failures.is_empty(), "{:?}", first.failures);
        let a = fs::read(ctx.output().join("images/a.png")).unwrap();
        let b = fs::read(ctx.output().join("images/b.jpg")).unwrap();

        let second = run(&ctx);
        assert_eq!(second.unchanged, 2);
        assert_eq!(fs::read(ctx.output().join("images/a.png")).unwrap(), a);
        assert_eq!(fs::read(ctx.output().join("images/b.jpg")).unwrap(), b);
    }

    #[test]
    fn test_private_images_skipped() {
        let (_dir, ctx) = context(BuildMode::Development, |_| {});
        write_source(&ctx, "_design/mock.png", "x");
        write_source(&ctx, "images/_drafts/a.png", "x");

        let report = run(&ctx);
        assert!(report.is_empty());
        assert!(!ctx.output().exists());
    }
}
