//! Image and collection command handlers

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use canopy_core::dto::image::CreateCollection;
use uuid::Uuid;

use crate::config::Config;

/// Image subcommands
#[derive(Subcommand)]
pub enum ImageCommands {
    /// Register source images by URL
    Register {
        /// Image URLs
        #[arg(required = true)]
        urls: Vec<String>,
    },
}

/// Collection subcommands
#[derive(Subcommand)]
pub enum CollectionCommands {
    /// Create a named collection of images
    Create {
        /// Collection name
        name: String,

        /// Image IDs (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        image: Vec<Uuid>,
    },
}

/// Handle image commands
pub async fn handle_image_command(command: ImageCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        ImageCommands::Register { urls } => {
            let images = client.register_images(urls).await?;

            println!(
                "{}",
                format!("✓ Registered {} image(s)", images.len()).green().bold()
            );
            for image in images {
                println!("  {} {}", image.id.to_string().cyan(), image.url.dimmed());
            }
            Ok(())
        }
    }
}

/// Handle collection commands
pub async fn handle_collection_command(command: CollectionCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        CollectionCommands::Create { name, image } => {
            let collection = client
                .create_collection(CreateCollection { name, images: image })
                .await?;

            println!("{}", "✓ Collection created successfully!".green().bold());
            println!("  ID:     {}", collection.id.to_string().cyan());
            println!("  Name:   {}", collection.name.bold());
            println!("  Images: {}", collection.images.len());
            Ok(())
        }
    }
}
