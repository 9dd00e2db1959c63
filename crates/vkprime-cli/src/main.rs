mod scene;

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use tracing::{error, info};
use vkprime_core::VkprimeConfig;
use vkprime_primer::format;
use vkprime_primer::{CommandSink, FixedLayout, ImageLayouts, ImagePrimer, StateBuilder};
use vkprime_protocol::vulkan_commands::VulkanCommand;
use vkprime_protocol::{StreamReader, StreamRecord, StreamWriter, WireError};

use crate::scene::SceneFile;

#[derive(Parser)]
#[command(name = "vkprime")]
#[command(about = "vkprime - prime captured image contents into rebuilt Vulkan images")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Prime every image of a scene and write the replay command stream
    Prime {
        /// Scene description (TOML)
        #[arg(short, long)]
        scene: String,

        /// Configuration file path
        #[arg(short, long)]
        config: Option<String>,

        /// Output command stream
        #[arg(short, long, default_value = "out.vkp")]
        out: String,

        /// Treat the scene contents as already on the device
        #[arg(long)]
        device_data: bool,
    },

    /// Print every record of a command stream file
    Dump {
        /// Command stream file
        file: String,

        /// Print records as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// List the formats the primer can convert
    Formats,
}

type StreamFile = StreamWriter<BufWriter<File>>;

/// Lets the state builder own a sink while the caller keeps the writer to
/// finish the stream afterwards.
#[derive(Clone)]
struct SharedStream(Arc<Mutex<StreamFile>>);

impl CommandSink for SharedStream {
    fn write(&mut self, command: VulkanCommand) -> Result<(), WireError> {
        CommandSink::write(&mut *self.0.lock(), command)
    }

    fn marker(&mut self, label: &str) -> Result<(), WireError> {
        CommandSink::marker(&mut *self.0.lock(), label)
    }
}

fn main() -> anyhow::Result<()> {
    vkprime_common::init_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::Prime {
            scene,
            config,
            out,
            device_data,
        } => {
            let config_path = config.unwrap_or_else(vkprime_core::default_config_path);
            let config = VkprimeConfig::load_or_default(&config_path);
            config.primer.validate()?;

            let scene = SceneFile::load(&scene)?.build(device_data)?;
            info!(images = scene.targets.len(), out = %out, "priming scene");

            let file = File::create(&out).with_context(|| format!("creating {}", out))?;
            let writer = StreamWriter::new(BufWriter::new(file), &config.output.producer, config.output.compress)?;
            let stream = SharedStream(Arc::new(Mutex::new(writer)));

            let mut sb = StateBuilder::new(
                Arc::new(scene.old),
                scene.new,
                Box::new(stream.clone()),
                config.primer.clone(),
            );
            let primer = ImagePrimer::new();
            let mut failed = 0;
            for (image, final_layout) in &scene.targets {
                if let Err(e) = prime_one(&mut sb, &primer, *image, *final_layout, !device_data) {
                    error!(%image, "priming failed: {:#}", e);
                    failed += 1;
                }
            }
            primer.free(&mut sb)?;
            sb.finish()?;

            let writer = Arc::try_unwrap(stream.0)
                .map_err(|_| anyhow::anyhow!("command stream still shared after the builder finished"))?
                .into_inner();
            let commands = writer.command_count();
            writer.finish()?;
            info!(commands, failed, "command stream written to {}", out);
            if failed > 0 {
                anyhow::bail!("{} of {} images could not be primed", failed, scene.targets.len());
            }
        }

        Commands::Dump { file, json } => {
            let input = File::open(&file).with_context(|| format!("opening {}", file))?;
            let mut reader = StreamReader::new(BufReader::new(input))?;
            println!("producer: {}", reader.producer());
            while let Some(record) = reader.next_record()? {
                if json {
                    println!("{}", serde_json::to_string(&record)?);
                    continue;
                }
                match record {
                    StreamRecord::Command { seq, command } => println!("{:>8}  {}  {:?}", seq, command.name(), command),
                    StreamRecord::Marker { label } => println!("          -- {}", label),
                    StreamRecord::End { command_count } => println!("end: {} commands", command_count),
                    StreamRecord::Header { .. } => {}
                }
            }
        }

        Commands::Formats => {
            println!("{:<32} {:>5}  {:>8}", "format", "bytes", "staging");
            for info in format::known_formats() {
                let aspects = vkprime_primer::ImageAspect::from_flags(format::aspects_of(info.format));
                let staging: Vec<String> = aspects
                    .iter()
                    .filter_map(|a| format::staging_image_count(info.format, *a).ok())
                    .map(|n| n.to_string())
                    .collect();
                println!(
                    "{:<32} {:>5}  {:>8}",
                    format!("{:?}", info.format),
                    info.element_size,
                    staging.join("+")
                );
            }
        }
    }

    Ok(())
}

fn prime_one(
    sb: &mut StateBuilder,
    primer: &ImagePrimer,
    image: vkprime_protocol::ReplayHandle,
    final_layout: ash::vk::ImageLayout,
    from_host_data: bool,
) -> anyhow::Result<()> {
    sb.marker(&format!("prime {}", image))?;
    let range = sb.new_state().image(image)?.full_range();
    let mut data = primer.new_primeable_image_data(sb, image, &[range], from_host_data)?;
    let src_layouts = ImageLayouts::snapshot(sb.new_state().image(image)?);
    let primed = data.prime(sb, primer, &src_layouts, &FixedLayout(final_layout));
    data.free(sb)?;
    primed?;
    info!(%image, strategy = %data.strategy(), "image primed");
    Ok(())
}
