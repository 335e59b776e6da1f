//! Action execution.
//!
//! One thresholded channel per basal ganglia channel. Every channel is driven
//! by a constant bias, inhibited by its basal ganglia output and by the other
//! channels, so only the selected action's channel stays active. Effects of
//! action `i` are routed through connections gated by channel `i`.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::basal_ganglia::BasalGanglia;
use crate::compiler::compile_actions;
use crate::context::{ConstructionContext, Role};
use crate::error::{Result, SpaError};
use crate::model::{ConnectionSpec, Model, PortRef};
use crate::module::{HasPorts, Module, ModuleKind, Nonlinearity, Port, PortVocab, INPUT, OUTPUT};
use crate::transform::Transform;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ThalamusConfig {
    /// Channel activity below this is treated as off.
    pub threshold: f32,
    /// Strength of the inhibition between channels.
    pub mutual_inhibit: f32,
    /// Synapse from the basal ganglia output (seconds).
    pub synapse_bg: f32,
    /// Synapse of the mutual inhibition (seconds).
    pub synapse_inhibit: f32,
    /// Synapse of the routed effects (seconds).
    pub synapse_to: f32,
}

impl Default for ThalamusConfig {
    fn default() -> Self {
        Self {
            threshold: 0.2,
            mutual_inhibit: 1.0,
            synapse_bg: 0.008,
            synapse_inhibit: 0.008,
            synapse_to: 0.01,
        }
    }
}

impl ThalamusConfig {
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_mutual_inhibit(mut self, mutual_inhibit: f32) -> Self {
        self.mutual_inhibit = mutual_inhibit;
        self
    }

    pub fn with_synapse_to(mut self, synapse_to: f32) -> Self {
        self.synapse_to = synapse_to;
        self
    }

    fn validate(&self) -> Result<()> {
        for (attr, v) in [
            ("synapse_bg", self.synapse_bg),
            ("synapse_inhibit", self.synapse_inhibit),
            ("synapse_to", self.synapse_to),
        ] {
            if v < 0.0 {
                return Err(SpaError::validation_in(
                    "Thalamus",
                    attr,
                    format!("must be non-negative, got {v}"),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Thalamus {
    name: String,
    config: ThalamusConfig,
    ports: Vec<Port>,
    connections: Vec<ConnectionSpec>,
}

impl Thalamus {
    /// Register the thalamus under `name`, wire it to `bg` and compile the
    /// effects of `bg`'s actions as gated connections.
    pub fn build(
        model: &mut Model,
        name: &str,
        bg: &BasalGanglia,
        config: ThalamusConfig,
    ) -> Result<Self> {
        config.validate()?;
        let n = bg.channels();
        let module = Module::new(ModuleKind::Thalamus {
            channels: n,
            threshold: config.threshold,
        })
        .with_port(Port::input(INPUT, n, PortVocab::NonSemantic))
        .with_port(Port::output(OUTPUT, n, PortVocab::NonSemantic));
        let ports = module.ports().to_vec();

        let mut ctx = ConstructionContext::new(
            model,
            Role::Thalamus {
                owner: name.to_string(),
                channels: n,
                synapse: config.synapse_to,
                threshold: config.threshold,
            },
        );
        ctx.stage_module(name, module)?;

        let input = PortRef::new(name, INPUT);
        let bias = ctx.bias();
        ctx.emit(ConnectionSpec::new(bias, input.clone(), Transform::filled(n, 1, 1.0)))?;
        ctx.emit(
            ConnectionSpec::new(PortRef::new(bg.name(), OUTPUT), input.clone(), Transform::identity(n))
                .with_synapse(config.synapse_bg),
        )?;
        let inhibit = Transform::identity(n)
            .add(&Transform::filled(n, n, -1.0))?
            .scaled(config.mutual_inhibit);
        ctx.emit(
            ConnectionSpec::new(PortRef::new(name, OUTPUT), input, inhibit)
                .with_function(Nonlinearity::Threshold(config.threshold))
                .with_synapse(config.synapse_inhibit),
        )?;

        let connections = compile_actions(bg.actions(), ctx)?;
        info!(name, channels = n, connections = connections.len(), "built thalamus");
        Ok(Self {
            name: name.to_string(),
            config,
            ports,
            connections,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> ThalamusConfig {
        self.config
    }

    pub fn channels(&self) -> usize {
        self.ports.first().map_or(0, |p| p.dimensions)
    }

    /// Output of channel `index`, the gate of that action's effects.
    pub fn channel_output(&self, index: usize) -> Option<PortRef> {
        (index < self.channels()).then(|| PortRef::element(&self.name, OUTPUT, index))
    }

    pub fn connections(&self) -> &[ConnectionSpec] {
        &self.connections
    }
}

impl HasPorts for Thalamus {
    fn ports(&self) -> &[Port] {
        &self.ports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basal_ganglia::BasalGangliaConfig;
    use crate::context::BIAS_MODULE;

    fn setup() -> (Model, BasalGanglia) {
        let mut m = Model::with_seed("test", 5);
        m.register("state", Module::buffer(16)).unwrap();
        m.register("motor", Module::buffer(16)).unwrap();
        let bg = BasalGanglia::build(
            &mut m,
            "bg",
            &[
                "dot(state, A) --> motor = state * B",
                "dot(state, B) --> motor = C; state = A",
            ],
            BasalGangliaConfig::default(),
        )
        .unwrap();
        (m, bg)
    }

    #[test]
    fn wires_bias_bg_and_inhibition() {
        let (mut m, bg) = setup();
        let thal = Thalamus::build(&mut m, "thal", &bg, ThalamusConfig::default()).unwrap();
        let c = thal.connections();
        assert_eq!(c[0].source.module, BIAS_MODULE);
        assert_eq!(c[0].transform.shape(), (2, 1));
        assert_eq!(c[1].source, PortRef::new("bg", OUTPUT));
        assert_eq!(c[1].synapse, Some(0.008));
        assert_eq!(c[2].transform.get(0, 0), 0.0);
        assert_eq!(c[2].transform.get(0, 1), -1.0);
        assert_eq!(c[2].function, Some(Nonlinearity::Threshold(0.2)));
        assert!(c[0].function.is_none());
        assert_eq!(thal.channels(), 2);
    }

    #[test]
    fn effects_are_gated_by_their_channel() {
        let (mut m, bg) = setup();
        let thal = Thalamus::build(&mut m, "thal", &bg, ThalamusConfig::default()).unwrap();
        let effects: Vec<_> = thal.connections().iter().filter(|c| c.action.is_some()).collect();
        assert_eq!(effects.len(), 3);

        // live effect: gated by its own channel
        assert_eq!(effects[0].source, PortRef::new("state", OUTPUT));
        assert_eq!(effects[0].gate, thal.channel_output(0));
        assert_eq!(effects[0].synapse, Some(0.01));
        assert!(effects[0].function.is_none());

        // constant effects: driven from the channel itself
        assert_eq!(effects[1].source, PortRef::element("thal", OUTPUT, 1));
        assert_eq!(effects[1].transform.shape(), (16, 1));
        assert!(effects[1].gate.is_none());
        assert_eq!(effects[1].function, Some(Nonlinearity::Threshold(0.2)));
        assert_eq!(effects[2].sink, PortRef::new("state", INPUT));
    }

    #[test]
    fn channel_reads_use_the_configured_threshold() {
        let (mut m, bg) = setup();
        let config = ThalamusConfig::default().with_threshold(0.35);
        let thal = Thalamus::build(&mut m, "thal", &bg, config).unwrap();
        let from_channels: Vec<_> = thal
            .connections()
            .iter()
            .filter(|c| c.source.module == "thal")
            .collect();
        // mutual inhibition plus the two constant effects of action 1
        assert_eq!(from_channels.len(), 3);
        assert!(from_channels
            .iter()
            .all(|c| c.function == Some(Nonlinearity::Threshold(0.35))));
    }

    #[test]
    fn failed_build_leaves_model_untouched() {
        let (mut m, _) = setup();
        let bg = BasalGanglia::build(
            &mut m,
            "bg2",
            &["dot(state, A) --> nowhere = B"],
            BasalGangliaConfig::default(),
        )
        .unwrap();
        let before = m.connections().len();
        let err = Thalamus::build(&mut m, "thal", &bg, ThalamusConfig::default()).unwrap_err();
        assert!(matches!(err, SpaError::NameResolution { action: Some(0), .. }));
        assert_eq!(m.connections().len(), before);
        assert!(!m.contains("thal"));
    }
}
