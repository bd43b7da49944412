use clap::{Parser, Subcommand};
use dynamodel::query::QueryRequest;
use dynamodel::schema::{load_schema_dir, SchemaCompiler};
use dynamodel::{
    init_logging, DataService, LoadRequest, LogConfig, ModelConfig, RegistryHandle, SledStore, StorageBackend,
};
use log::{info, warn};
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and register a schema directory
    Check {
        /// Directory of JSON schema configs
        #[arg(long, short)]
        schemas: PathBuf,
    },
    /// Print an entity's validation schema as JSON Schema
    Schema {
        /// Directory of JSON schema configs
        #[arg(long, short)]
        schemas: PathBuf,
        /// Entity id
        #[arg(long, short)]
        entity: String,
    },
    /// Load a data file and run a query against it
    Query {
        /// Path to the TOML configuration file
        #[arg(long, short)]
        config: PathBuf,
        /// Overrides the configured schema directory
        #[arg(long, short)]
        schemas: Option<PathBuf>,
        /// JSON file mapping entity ids to arrays of instance documents
        #[arg(long, short)]
        data: PathBuf,
        /// Entity id
        #[arg(long, short)]
        entity: String,
        /// Association to query instead of the entity table
        #[arg(long, requires = "instance")]
        relation: Option<String>,
        /// Owning instance of the association
        #[arg(long, requires = "relation")]
        instance: Option<String>,
        #[arg(long, default_value_t = 0)]
        page: usize,
        #[arg(long)]
        page_size: Option<usize>,
        #[arg(long)]
        search: Option<String>,
        /// Column searched by --search; repeatable
        #[arg(long = "search-column")]
        search_columns: Vec<String>,
        #[arg(long)]
        sort: Option<String>,
        #[arg(long)]
        direction: Option<String>,
    },
}

fn temporary_store() -> Result<Arc<dyn StorageBackend>, Box<dyn std::error::Error>> {
    Ok(Arc::new(SledStore::temporary()?))
}

async fn handle_check(schemas: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let entries = load_schema_dir(&schemas)?;
    let handle = RegistryHandle::open(temporary_store()?, SchemaCompiler::new(), entries).await?;
    let set = handle.current();

    let mut models: Vec<_> = set.models().collect();
    models.sort_by(|a, b| a.entity().cmp(b.entity()));
    println!(
        "{} entities, fingerprint {}",
        set.validators().len(),
        set.validators().fingerprint()
    );
    for model in models {
        let accessors: Vec<_> = set
            .accessors(model.entity())
            .map(|entry| format!("{} ({} {})", entry.descriptor.property, entry.descriptor.kind, entry.descriptor.target))
            .collect();
        println!(
            "  {}: {} column(s), {} virtual(s){}",
            model.entity(),
            model.table.columns.len(),
            model.virtuals.len(),
            if accessors.is_empty() {
                String::new()
            } else {
                format!(", associations: {}", accessors.join(", "))
            }
        );
    }
    Ok(())
}

fn handle_schema(schemas: PathBuf, entity: String) -> Result<(), Box<dyn std::error::Error>> {
    let entries = load_schema_dir(&schemas)?;
    let compiled = SchemaCompiler::new().compile_all(&entries, 1)?;
    let validation = compiled
        .validators
        .get(&entity)
        .ok_or_else(|| format!("no schema for entity '{}'", entity))?;
    println!("{}", serde_json::to_string_pretty(&validation.to_json_schema())?);
    Ok(())
}

async fn handle_query(
    config: PathBuf,
    schemas: Option<PathBuf>,
    data: PathBuf,
    entity: String,
    relation: Option<String>,
    instance: Option<String>,
    query: QueryRequest,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = ModelConfig::from_file(&config)?;
    if let Some(dir) = schemas {
        config = config.with_schemas_dir(dir);
    }
    if let Err(e) = init_logging(&config.logging) {
        warn!("Logging not reconfigured: {}", e);
    }

    let backend: Arc<dyn StorageBackend> = Arc::new(config.open_store()?);
    let entries = load_schema_dir(&config.schemas_dir)?;
    let compiler = SchemaCompiler::with_reserved_marker(config.reserved_marker);
    let handle = Arc::new(RegistryHandle::open(backend, compiler, entries).await?);
    let service = DataService::with_page_size(handle, config.default_page_size);

    let documents: Value = serde_json::from_str(&fs::read_to_string(&data)?)?;
    let by_entity = documents
        .as_object()
        .ok_or("data file must be an object of entity id to documents")?;
    for (entity_id, docs) in by_entity {
        let docs = docs.as_array().cloned().unwrap_or_default();
        let report = service.bulk_load(entity_id, docs).await;
        info!("Loaded {} '{}' document(s)", report.loaded.len(), entity_id);
        for failure in &report.failed {
            eprintln!("{} #{}: {}", entity_id, failure.index, failure.error);
        }
    }

    let request = match (relation, instance) {
        (Some(property), Some(instance_id)) => LoadRequest::scoped(entity, instance_id, property),
        _ => LoadRequest::entity(entity),
    }
    .with_query(query);
    let result = service.load_data(request).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { schemas } => {
            init_logging(&LogConfig::default()).ok();
            handle_check(schemas).await?
        }
        Commands::Schema { schemas, entity } => {
            init_logging(&LogConfig::default()).ok();
            handle_schema(schemas, entity)?
        }
        Commands::Query {
            config,
            schemas,
            data,
            entity,
            relation,
            instance,
            page,
            page_size,
            search,
            search_columns,
            sort,
            direction,
        } => {
            let query = QueryRequest {
                page,
                page_size,
                search_term: search,
                search_columns,
                sort_column: sort,
                sort_direction: direction,
                ..Default::default()
            };
            handle_query(config, schemas, data, entity, relation, instance, query).await?
        }
    }

    Ok(())
}
