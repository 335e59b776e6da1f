//! spa-actions: compile a model description into connection specs.
//!
//! ```text
//! spa-actions model.json            # print the emitted connections as JSON
//! spa-actions --parse "<rule>"      # print the syntax tree of one rule
//! ```

use std::fs;
use std::process::ExitCode;

use serde::{Deserialize, Serialize};
use spa_actions::prelude::*;
use tracing::{error, info};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
enum ModuleDesc {
    Buffer { name: String, dimensions: usize },
    Memory {
        name: String,
        dimensions: usize,
        #[serde(default = "default_memory_synapse")]
        synapse: f32,
    },
}

fn default_memory_synapse() -> f32 {
    0.1
}

#[derive(Debug, Deserialize)]
struct VocabDesc {
    dimensions: usize,
    #[serde(default)]
    symbols: Vec<String>,
    #[serde(default)]
    unitary: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CorticalDesc {
    #[serde(default = "default_cortical_name")]
    name: String,
    actions: Vec<String>,
    #[serde(default)]
    config: CorticalConfig,
}

fn default_cortical_name() -> String {
    "cortical".to_string()
}

#[derive(Debug, Deserialize)]
struct SelectionDesc {
    #[serde(default = "default_bg_name")]
    bg: String,
    #[serde(default = "default_thalamus_name")]
    thalamus: String,
    actions: Vec<String>,
    #[serde(default)]
    bg_config: BasalGangliaConfig,
    #[serde(default)]
    thalamus_config: ThalamusConfig,
}

fn default_bg_name() -> String {
    "bg".to_string()
}

fn default_thalamus_name() -> String {
    "thal".to_string()
}

#[derive(Debug, Deserialize)]
struct ModelDesc {
    #[serde(default = "default_label")]
    label: String,
    #[serde(default)]
    seed: Option<u64>,
    #[serde(default)]
    vocabs: Vec<VocabDesc>,
    modules: Vec<ModuleDesc>,
    #[serde(default)]
    cortical: Option<CorticalDesc>,
    #[serde(default)]
    selection: Option<SelectionDesc>,
}

fn default_label() -> String {
    "model".to_string()
}

#[derive(Debug, Serialize)]
struct Output<'a> {
    label: &'a str,
    modules: &'a [String],
    connections: &'a [ConnectionSpec],
}

fn build(desc: &ModelDesc) -> Result<Model> {
    let mut model = match desc.seed {
        Some(seed) => Model::with_seed(&desc.label, seed),
        None => Model::new(&desc.label),
    };
    for v in &desc.vocabs {
        let vocab = model.default_vocab(v.dimensions);
        for s in &v.unitary {
            vocab.create_unitary_pointer(s)?;
        }
        for s in &v.symbols {
            vocab.create_pointer(s)?;
        }
    }
    for m in &desc.modules {
        match m {
            ModuleDesc::Buffer { name, dimensions } => {
                model.register(name, Module::buffer(*dimensions))?
            }
            ModuleDesc::Memory {
                name,
                dimensions,
                synapse,
            } => model.register(name, Module::memory(*dimensions, *synapse))?,
        }
    }
    if let Some(c) = &desc.cortical {
        Cortical::build(&mut model, &c.name, c.actions.as_slice(), c.config)?;
    }
    if let Some(s) = &desc.selection {
        let bg = BasalGanglia::build(&mut model, &s.bg, s.actions.as_slice(), s.bg_config)?;
        Thalamus::build(&mut model, &s.thalamus, &bg, s.thalamus_config)?;
    }
    Ok(model)
}

fn run(args: &[String]) -> std::result::Result<(), Box<dyn std::error::Error>> {
    match args {
        [flag, rule] if flag == "--parse" => {
            let action = spa_actions::parser::parse_action(rule, 0)?;
            println!("{}", serde_json::to_string_pretty(&action)?);
        }
        [path] => {
            let text = fs::read_to_string(path)?;
            let desc: ModelDesc = serde_json::from_str(&text)?;
            let model = build(&desc)?;
            info!(
                modules = model.module_names().len(),
                connections = model.connections().len(),
                "compiled model"
            );
            let out = Output {
                label: model.label(),
                modules: model.module_names(),
                connections: model.connections(),
            };
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        _ => {
            print_help();
            return Err("expected a model file or --parse <rule>".into());
        }
    }
    Ok(())
}

fn print_help() {
    println!("spa-actions (semantic pointer action compiler)");
    println!("usage:");
    println!("  spa-actions <model.json>");
    println!("  spa-actions --parse \"<rule>\"");
}

fn main() -> ExitCode {
    // stdout carries the JSON document
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if matches!(args.first().map(String::as_str), Some("--help" | "-h" | "help")) {
        print_help();
        return ExitCode::SUCCESS;
    }
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
