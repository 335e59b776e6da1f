//! Action selection.
//!
//! Each action's condition becomes a utility on one channel of the basal
//! ganglia module. The channels compete through the Gurney, Prescott and
//! Redgrave (2001) circuit: two striatal populations (D1, D2), the
//! subthalamic nucleus, the external globus pallidus and the output stage
//! (GPi). The output is near zero on the winning channel and strongly
//! negative on the others, so it can be used directly to inhibit a thalamus.
//!
//! The module relays its `input` to `utility` (read by the striatum and STN)
//! and its `inhibition` to `output` (written by GPi). The output is an
//! inhibitory signal, not a 0/1 gate; the thalamus turns it into one.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ast::Actions;
use crate::compiler::compile_actions;
use crate::context::{ConstructionContext, Role};
use crate::error::{Result, SpaError};
use crate::model::{ConnectionSpec, Model, PortRef};
use crate::module::{HasPorts, HelperKind, Module, ModuleKind, Nonlinearity, Port, PortVocab, INPUT, OUTPUT};
use crate::transform::Transform;

/// Port carrying the relayed utilities.
pub const UTILITY: &str = "utility";
/// Port receiving the GPi output.
pub const INHIBITION: &str = "inhibition";

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BasalGangliaConfig {
    /// Utility to striatum.
    pub ws: f32,
    /// Utility to STN.
    pub wt: f32,
    /// Striatum to GPi / GPe.
    pub wm: f32,
    /// GPe to STN.
    pub wg: f32,
    /// STN to GPi / GPe (diffuse).
    pub wp: f32,
    /// GPe to GPi.
    pub we: f32,
    /// Striatal output threshold.
    pub e: f32,
    /// STN output threshold.
    pub ep: f32,
    /// GPe output threshold.
    pub ee: f32,
    /// GPi output threshold.
    pub eg: f32,
    /// D2 input attenuation.
    pub le: f32,
    /// D1 input gain.
    pub lg: f32,
    /// Scale of GPi onto the output.
    pub output_weight: f32,
    /// Synapse of utility connections (seconds).
    pub input_synapse: f32,
    /// Synapse of connections inside the circuit (seconds).
    pub synapse: f32,
}

impl Default for BasalGangliaConfig {
    fn default() -> Self {
        Self {
            ws: 1.0,
            wt: 1.0,
            wm: 1.0,
            wg: 1.0,
            wp: 0.9,
            we: 0.3,
            e: 0.2,
            ep: -0.25,
            ee: -0.2,
            eg: -0.2,
            le: 0.2,
            lg: 0.2,
            output_weight: -3.0,
            input_synapse: 0.002,
            synapse: 0.008,
        }
    }
}

impl BasalGangliaConfig {
    pub fn with_output_weight(mut self, output_weight: f32) -> Self {
        self.output_weight = output_weight;
        self
    }

    pub fn with_input_synapse(mut self, input_synapse: f32) -> Self {
        self.input_synapse = input_synapse;
        self
    }

    pub fn with_synapse(mut self, synapse: f32) -> Self {
        self.synapse = synapse;
        self
    }

    fn validate(&self) -> Result<()> {
        for (attr, v) in [("input_synapse", self.input_synapse), ("synapse", self.synapse)] {
            if v < 0.0 {
                return Err(SpaError::validation_in(
                    "BasalGanglia",
                    attr,
                    format!("must be non-negative, got {v}"),
                ));
            }
        }
        Ok(())
    }
}

/// The ports of one action channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPorts {
    /// Utility input of the channel.
    pub utility: PortRef,
    /// GPi output of the channel: about 0 when the action is selected and
    /// negative otherwise. The multiplicative gate of an action's effects is
    /// [`Thalamus::channel_output`](crate::thalamus::Thalamus::channel_output).
    pub inhibition: PortRef,
}

#[derive(Debug, Clone)]
pub struct BasalGanglia {
    name: String,
    config: BasalGangliaConfig,
    actions: Actions,
    ports: Vec<Port>,
    connections: Vec<ConnectionSpec>,
}

impl BasalGanglia {
    /// Register the selection circuit under `name` and compile every action's
    /// condition into its utility channel.
    pub fn build<S: AsRef<str>>(
        model: &mut Model,
        name: &str,
        actions: &[S],
        config: BasalGangliaConfig,
    ) -> Result<Self> {
        let actions = Actions::parse(actions)?;
        Self::build_parsed(model, name, actions, config)
    }

    pub fn build_parsed(
        model: &mut Model,
        name: &str,
        actions: Actions,
        config: BasalGangliaConfig,
    ) -> Result<Self> {
        config.validate()?;
        let n = actions.len();
        if n == 0 {
            return Err(SpaError::validation_in(
                "BasalGanglia",
                "actions",
                "at least one action is required",
            ));
        }

        let module = Module::new(ModuleKind::BasalGanglia { channels: n })
            .with_port(Port::input(INPUT, n, PortVocab::NonSemantic))
            .with_port(Port::output(UTILITY, n, PortVocab::NonSemantic))
            .with_port(Port::input(INHIBITION, n, PortVocab::NonSemantic))
            .with_port(Port::output(OUTPUT, n, PortVocab::NonSemantic));
        let ports = module.ports().to_vec();

        let mut ctx = ConstructionContext::new(
            model,
            Role::BasalGanglia {
                owner: name.to_string(),
                channels: n,
                synapse: config.input_synapse,
            },
        );
        ctx.stage_module(name, module)?;
        wire_circuit(&mut ctx, name, n, &config)?;
        let connections = compile_actions(&actions, ctx)?;
        info!(name, channels = n, connections = connections.len(), "built basal ganglia");

        Ok(Self {
            name: name.to_string(),
            config,
            actions,
            ports,
            connections,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> BasalGangliaConfig {
        self.config
    }

    pub fn actions(&self) -> &Actions {
        &self.actions
    }

    pub fn channels(&self) -> usize {
        self.actions.len()
    }

    pub fn channel(&self, index: usize) -> Option<ChannelPorts> {
        (index < self.channels()).then(|| ChannelPorts {
            utility: PortRef::element(&self.name, INPUT, index),
            inhibition: PortRef::element(&self.name, OUTPUT, index),
        })
    }

    /// Connections emitted when the builder ran, circuit included.
    pub fn connections(&self) -> &[ConnectionSpec] {
        &self.connections
    }
}

impl HasPorts for BasalGanglia {
    fn ports(&self) -> &[Port] {
        &self.ports
    }
}

fn wire_circuit(
    ctx: &mut ConstructionContext<'_>,
    name: &str,
    n: usize,
    c: &BasalGangliaConfig,
) -> Result<()> {
    let pop = |p: &str| format!("{name}.{p}");
    for p in ["strD1", "strD2", "stn", "gpe", "gpi"] {
        ctx.stage_module(&pop(p), Module::helper(HelperKind::EnsembleArray { channels: n }))?;
    }
    let out = |p: &str| PortRef::new(&pop(p), OUTPUT);
    let inp = |p: &str| PortRef::new(&pop(p), INPUT);
    let eye = |k: f32| Transform::identity(n).scaled(k);
    let diffuse = |k: f32| Transform::filled(n, n, k);
    let rect = |threshold: f32| Nonlinearity::Rectify { threshold, gain: 1.0 };
    let utility = PortRef::new(name, UTILITY);

    let specs = [
        ConnectionSpec::new(utility.clone(), inp("strD1"), eye(c.ws * (1.0 + c.lg))),
        ConnectionSpec::new(utility.clone(), inp("strD2"), eye(c.ws * (1.0 - c.le))),
        ConnectionSpec::new(utility, inp("stn"), eye(c.wt)),
        ConnectionSpec::new(out("strD1"), inp("gpi"), eye(-c.wm))
            .with_function(rect(c.e))
            .with_synapse(c.synapse),
        ConnectionSpec::new(out("strD2"), inp("gpe"), eye(-c.wm))
            .with_function(rect(c.e))
            .with_synapse(c.synapse),
        ConnectionSpec::new(out("stn"), inp("gpi"), diffuse(c.wp))
            .with_function(rect(c.ep))
            .with_synapse(c.synapse),
        ConnectionSpec::new(out("stn"), inp("gpe"), diffuse(c.wp))
            .with_function(rect(c.ep))
            .with_synapse(c.synapse),
        ConnectionSpec::new(out("gpe"), inp("gpi"), eye(-c.we))
            .with_function(rect(c.ee))
            .with_synapse(c.synapse),
        ConnectionSpec::new(out("gpe"), inp("stn"), eye(-c.wg))
            .with_function(rect(c.ee))
            .with_synapse(c.synapse),
        ConnectionSpec::new(out("gpi"), PortRef::new(name, INHIBITION), eye(c.output_weight))
            .with_function(rect(c.eg)),
    ];
    for spec in specs {
        ctx.emit(spec)?;
    }
    Ok(())
}
