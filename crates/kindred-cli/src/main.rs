use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use kindred_core::{Engine, EngineConfig, IdentityStore, MatchOutcome};
use kindred_store::SqliteStore;

#[derive(Parser)]
#[command(name = "kindred", about = "Kindred gallery face curation CLI")]
struct Cli {
    /// Path to the identity database (default: $XDG_DATA_HOME/kindred/gallery.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List known people with face and photo counts
    People,
    /// Group unmapped faces into provisional clusters for review
    Groups {
        /// Similarity threshold for grouping (default from config)
        #[arg(short, long)]
        threshold: Option<f32>,
    },
    /// List unmapped faces
    Unmapped,
    /// Create a new person from a face
    Create {
        face_id: i64,
        /// Display name for the new person
        #[arg(short, long)]
        name: Option<String>,
        /// External contact reference
        #[arg(long)]
        contact: Option<String>,
    },
    /// Assign a face to an existing person
    Assign {
        face_id: i64,
        person_id: i64,
        /// Record the mapping as unverified (automatic-style)
        #[arg(long)]
        unverified: bool,
    },
    /// Remove a face's person association
    Unassign { face_id: i64 },
    /// Confirm an automatic match
    Verify { face_id: i64 },
    /// Match a stored face against the known people
    Resolve { face_id: i64 },
    /// Rename a person
    Rename { person_id: i64, name: String },
    /// Delete a person (faces and photos are kept)
    Remove { person_id: i64 },
    /// Show database statistics
    Stats,
    /// Delete all identity data
    Wipe {
        /// Required confirmation flag
        #[arg(long)]
        yes: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::from_env();
    let db_path = cli.db.unwrap_or_else(kindred_core::config::default_db_path);
    let store = SqliteStore::open(&db_path, config.embedding_dim)?;
    let engine = Engine::new(store, config);

    match cli.command {
        Commands::People => {
            let summaries = engine.people_summaries()?;
            if summaries.is_empty() {
                println!("No people yet");
                return Ok(());
            }
            for s in summaries {
                println!(
                    "#{:<5} {:<24} {} faces across {} photos",
                    s.person.id,
                    s.person.name.as_deref().unwrap_or("(unnamed)"),
                    s.face_count,
                    s.photo_count,
                );
            }
        }
        Commands::Groups { threshold } => {
            let groups = engine.cluster_unmapped(threshold)?;
            if groups.is_empty() {
                println!("No unmapped faces to group");
                return Ok(());
            }
            for (i, group) in groups.iter().enumerate() {
                let ids: Vec<String> = group.iter().map(|id| id.to_string()).collect();
                println!("group {:<3} ({} faces): {}", i + 1, group.len(), ids.join(", "));
            }
        }
        Commands::Unmapped => {
            let faces = engine.store().unmapped_faces()?;
            if faces.is_empty() {
                println!("No unmapped faces");
                return Ok(());
            }
            for face in faces {
                println!(
                    "face #{:<5} photo #{:<5} confidence {:.2} detected {}",
                    face.id,
                    face.photo_id,
                    face.confidence,
                    face.detected_at.format("%Y-%m-%d %H:%M"),
                );
            }
        }
        Commands::Create { face_id, name, contact } => {
            let person_id =
                engine.create_person_from_face(face_id, name.as_deref(), contact.as_deref())?;
            println!("Created person #{person_id} from face #{face_id}");
        }
        Commands::Assign { face_id, person_id, unverified } => {
            let similarity = engine.assign_face(face_id, person_id, !unverified)?;
            println!("Assigned face #{face_id} to person #{person_id} (similarity {similarity:.3})");
        }
        Commands::Unassign { face_id } => {
            engine.unassign_face(face_id)?;
            println!("Unassigned face #{face_id}");
        }
        Commands::Verify { face_id } => {
            engine.verify_mapping(face_id)?;
            println!("Verified mapping for face #{face_id}");
        }
        Commands::Resolve { face_id } => match engine.resolve_face(face_id)? {
            MatchOutcome::Matched { person_id, similarity } => {
                let name = engine
                    .store()
                    .person(person_id)?
                    .and_then(|p| p.name)
                    .unwrap_or_else(|| "(unnamed)".to_string());
                println!("Match: person #{person_id} {name} (similarity {similarity:.3})");
            }
            MatchOutcome::NoMatch { best_similarity } => {
                println!("No match (best similarity {best_similarity:.3})");
            }
        },
        Commands::Rename { person_id, name } => {
            engine.store().update_person(person_id, Some(&name), None, None)?;
            println!("Renamed person #{person_id} to {name}");
        }
        Commands::Remove { person_id } => {
            engine.store().delete_person(person_id)?;
            println!("Removed person #{person_id}; their faces are unmapped again");
        }
        Commands::Stats => {
            let stats = engine.statistics()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Wipe { yes } => {
            if !yes {
                println!("Refusing to wipe without --yes");
                return Ok(());
            }
            engine.store().clear_all()?;
            println!("All identity data deleted");
        }
    }

    Ok(())
}
