//! Unconditional module-to-module wiring.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::ast::Actions;
use crate::compiler::compile_actions;
use crate::context::{ConstructionContext, Role};
use crate::error::{Result, SpaError};
use crate::model::{ConnectionSpec, Model};
use crate::module::{HasPorts, Module, ModuleKind, Port};

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CorticalConfig {
    /// Synaptic time constant of every emitted connection (seconds).
    pub synapse: f32,
}

impl Default for CorticalConfig {
    fn default() -> Self {
        Self { synapse: 0.01 }
    }
}

impl CorticalConfig {
    pub fn with_synapse(mut self, synapse: f32) -> Self {
        self.synapse = synapse;
        self
    }
}

/// A set of effect-only actions applied as direct connections.
#[derive(Debug, Clone)]
pub struct Cortical {
    name: String,
    config: CorticalConfig,
    actions: Actions,
    connections: Vec<ConnectionSpec>,
}

impl Cortical {
    /// Compile `actions` into `model` under the module name `name`.
    ///
    /// Rules with a condition are rejected before the model is touched.
    pub fn build<S: AsRef<str>>(
        model: &mut Model,
        name: &str,
        actions: &[S],
        config: CorticalConfig,
    ) -> Result<Self> {
        let actions = Actions::parse(actions)?;
        Self::build_parsed(model, name, actions, config)
    }

    pub fn build_parsed(
        model: &mut Model,
        name: &str,
        actions: Actions,
        config: CorticalConfig,
    ) -> Result<Self> {
        if config.synapse < 0.0 {
            return Err(SpaError::validation_in(
                "Cortical",
                "synapse",
                format!("must be non-negative, got {}", config.synapse),
            ));
        }
        let mut ctx = ConstructionContext::new(
            model,
            Role::Cortical {
                owner: name.to_string(),
                synapse: config.synapse,
            },
        );
        ctx.stage_module(
            name,
            Module::new(ModuleKind::Cortical {
                synapse: config.synapse,
            }),
        )?;
        let connections = compile_actions(&actions, ctx)?;
        Ok(Self {
            name: name.to_string(),
            config,
            actions,
            connections,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> CorticalConfig {
        self.config
    }

    pub fn actions(&self) -> &Actions {
        &self.actions
    }

    /// Connections emitted when the builder ran.
    pub fn connections(&self) -> &[ConnectionSpec] {
        &self.connections
    }
}

impl HasPorts for Cortical {
    fn ports(&self) -> &[Port] {
        &[]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PortRef;

    fn model() -> Model {
        let mut m = Model::with_seed("test", 3);
        m.register("state", Module::buffer(16)).unwrap();
        m.register("motor", Module::buffer(16)).unwrap();
        m
    }

    #[test]
    fn builds_direct_connections() {
        let mut m = model();
        let c = Cortical::build(
            &mut m,
            "cortical",
            &["motor = state * A", "state = B"],
            CorticalConfig::default(),
        )
        .unwrap();
        assert_eq!(c.connections().len(), 2);
        assert_eq!(c.connections()[0].sink, PortRef::new("motor", "input"));
        assert!(c.connections().iter().all(|s| s.synapse == Some(0.01)));
        assert!(c.connections().iter().all(|s| s.gate.is_none()));
        assert!(m.contains("cortical"));
        assert_eq!(m.connections().len(), 2);
    }

    #[test]
    fn condition_is_rejected_without_mutation() {
        let mut m = model();
        let before = m.module_names().to_vec();
        let err = Cortical::build(
            &mut m,
            "cortical",
            &["state = A", "dot(state, A) --> state = B"],
            CorticalConfig::default(),
        )
        .unwrap_err();
        match err {
            SpaError::Validation { owner, attr, message } => {
                assert_eq!(owner.as_deref(), Some("Cortical"));
                assert_eq!(attr, "actions");
                assert!(message.contains("action 1"), "{message}");
                assert!(message.contains("dot(state, A)"), "{message}");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(m.module_names(), before.as_slice());
        assert!(m.connections().is_empty());
        assert!(m.default_vocab(16).is_empty());
    }

    #[test]
    fn custom_synapse() {
        let mut m = model();
        let c = Cortical::build(
            &mut m,
            "fast",
            &["motor = state"],
            CorticalConfig::default().with_synapse(0.005),
        )
        .unwrap();
        assert_eq!(c.connections()[0].synapse, Some(0.005));
        assert!(Cortical::build(&mut m, "fast", &["motor = state"], CorticalConfig::default()).is_err());
    }
}
