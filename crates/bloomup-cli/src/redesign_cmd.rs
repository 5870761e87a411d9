//! `bloomup redesign` command: run one redesign attempt to completion.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};

use bloomup_core::entitlement::EntitlementStore;
use bloomup_core::locator::{LocationProvider, SupplierLocator};
use bloomup_core::orchestrator::{Affordance, Orchestrator, RedesignRequest, RedesignResult, WorkflowState};
use bloomup_core::presets::{default_preset, find_preset, load_presets};
use bloomup_core::synthesis::{EncodedImage, GeminiClient};

/// Options for a single redesign run.
pub struct RedesignOptions {
    pub image: PathBuf,
    pub style: Option<String>,
    pub output: Option<PathBuf>,
    pub suppliers: bool,
}

/// Run the redesign command.
///
/// The output file is opened before the attempt starts, so an unwritable
/// destination fails the command without spending quota. Exits with an error
/// when the attempt fails; supplier lookup failures are reported but do not
/// fail the command.
pub async fn run_redesign(
    entitlements: Arc<EntitlementStore>,
    client: GeminiClient,
    location: Arc<dyn LocationProvider>,
    options: RedesignOptions,
) -> Result<()> {
    let style = match options.style.as_deref() {
        Some(id) => find_preset(id).with_context(|| {
            let known: Vec<_> = load_presets().into_iter().map(|p| p.id).collect();
            format!("unknown style {id:?}; available: {}", known.join(", "))
        })?,
        None => default_preset(),
    };

    let bytes = std::fs::read(&options.image)
        .with_context(|| format!("failed to read image {}", options.image.display()))?;
    let source_image = EncodedImage::from_bytes(&bytes, mime_for_path(&options.image));

    let output_path = options
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&options.image, &style.id));
    let output = OutputFile::open(output_path)?;

    let client = Arc::new(client);
    let orchestrator = Orchestrator::new(entitlements, client.clone());

    println!("Redesigning {} as {}...", options.image.display(), style.name);
    let state = match orchestrator
        .run(RedesignRequest {
            source_image,
            style: style.clone(),
        })
        .await
    {
        Ok(state) => state,
        Err(e) => {
            output.discard();
            return Err(e.into());
        }
    };

    let result = match state {
        WorkflowState::Succeeded { result, .. } => result,
        WorkflowState::Failed { error, .. } => {
            output.discard();
            eprintln!("{}", error.user_message());
            match error.affordance() {
                Affordance::Upgrade => eprintln!("Run `bloomup tier pro` to upgrade."),
                Affordance::Retry => eprintln!("Run the same command again to retry."),
            }
            bail!("redesign failed: {error}");
        }
        other => {
            output.discard();
            bail!("redesign ended in unexpected state {}", other.status())
        }
    };

    let image = match result.redesigned_image.decode() {
        Ok(image) => image,
        Err(e) => {
            output.discard();
            return Err(e).context("generated image is not valid base64");
        }
    };
    let written = output.path.clone();
    output.write(&image)?;
    println!("Redesigned image written to {}", written.display());
    println!();
    print_plan(&result);

    let remaining = orchestrator.entitlements().remaining_attempts().await?;
    println!();
    println!("Redesigns remaining today: {remaining}");

    if options.suppliers {
        println!();
        let locator = SupplierLocator::new(client, location);
        match locator.locate_for(&orchestrator).await {
            Ok(found) if found.is_empty() => println!("No suppliers found nearby."),
            Ok(found) => {
                println!("Nearby suppliers:");
                for supplier in found {
                    println!("  {} <{}>", supplier.title, supplier.uri);
                }
            }
            Err(e) => eprintln!("Supplier lookup unavailable: {e}"),
        }
    }

    Ok(())
}

fn print_plan(result: &RedesignResult) {
    if !result.inventory.is_empty() {
        println!("Inventory:");
        for item in &result.inventory {
            println!("  {} ({}) - {}", item.item, item.price_range, item.description);
        }
    }

    if !result.implementation_guide.is_empty() {
        println!("Implementation guide:");
        for (i, phase) in result.implementation_guide.iter().enumerate() {
            match &phase.phase {
                Some(label) => println!("  {}. {label}: {}", i + 1, phase.title),
                None => println!("  {}. {}", i + 1, phase.title),
            }
            for action in &phase.actions {
                println!("     - {action}");
            }
        }
    }

    if !result.maintenance_checklist.is_empty() {
        println!("Maintenance checklist:");
        for task in &result.maintenance_checklist {
            println!("  [ ] {task}");
        }
    }
}

/// The destination image, opened before any quota is spent.
struct OutputFile {
    path: PathBuf,
    file: File,
    /// The file did not exist before `open`.
    created: bool,
}

impl OutputFile {
    /// Open `path` for writing without truncating an existing file.
    fn open(path: PathBuf) -> Result<Self> {
        if path.is_dir() {
            bail!("output {} is a directory", path.display());
        }
        let created = !path.exists();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("cannot write output {}", path.display()))?;
        Ok(Self {
            path,
            file,
            created,
        })
    }

    /// Replace the file contents with `bytes`.
    fn write(mut self, bytes: &[u8]) -> Result<()> {
        self.file
            .set_len(0)
            .and_then(|()| self.file.write_all(bytes))
            .with_context(|| format!("failed to write {}", self.path.display()))
    }

    /// Remove the file if `open` created it; an existing file is left as it was.
    fn discard(self) {
        if !self.created {
            return;
        }
        drop(self.file);
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove unused output file");
        }
    }
}

/// MIME type from the file extension, defaulting to JPEG.
fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("heic") => "image/heic",
        _ => "image/jpeg",
    }
}

/// `<stem>-<style>.png` next to the source image.
fn default_output_path(image: &Path, style_id: &str) -> PathBuf {
    let stem = image
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("redesign");
    image.with_file_name(format!("{stem}-{style_id}.png"))
}
