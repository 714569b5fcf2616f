use burn::{
    nn::{
        lstm::{Lstm, LstmConfig},
        Dropout, DropoutConfig,
        Linear, LinearConfig,
    },
    prelude::*,
    tensor::activation::{relu, softmax},
};
use serde::{Deserialize, Serialize};

use crate::domain::node::NodeSpec;

/// The network a CtcModel wraps: everything up to and including the
/// per-timestep classification layer. `forward` must return softmax
/// probabilities of shape [batch, time, num_classes] with the CTC blank
/// as the last class.
pub trait CtcNetwork<B: Backend>: Module<B> {
    fn forward(&self, features: Tensor<B, 3>) -> Tensor<B, 3>;

    /// Features per timestep the network accepts.
    fn input_width(&self) -> usize;

    /// Layer listing for `CtcModel::summary`.
    fn layers(&self) -> Vec<LayerSummary>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSummary {
    pub name:         String,
    pub kind:         String,
    pub output_shape: String,
    pub params:       usize,
}

impl LayerSummary {
    pub fn new(name: &str, kind: &str, output_shape: String, params: usize) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            output_shape,
            params,
        }
    }
}

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize.
#[derive(Config, Debug)]
pub struct HtrNetworkConfig {
    pub num_features: usize,
    /// Charset size + 1 (blank)
    pub num_classes:  usize,
    #[config(default = 128)]
    pub hidden_size:  usize,
    #[config(default = 0.2)]
    pub dropout:      f64,
}

impl HtrNetworkConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> HtrNetwork<B> {
        HtrNetwork {
            projection: LinearConfig::new(self.num_features, self.hidden_size).init(device),
            lstm:       LstmConfig::new(self.hidden_size, self.hidden_size, true).init(device),
            dropout:    DropoutConfig::new(self.dropout).init(),
            classifier: LinearConfig::new(self.hidden_size, self.num_classes).init(device),
            num_features: self.num_features,
            hidden_size:  self.hidden_size,
            num_classes:  self.num_classes,
        }
    }
}

/// Projection → LSTM → per-timestep softmax classifier.
#[derive(Module, Debug)]
pub struct HtrNetwork<B: Backend> {
    pub projection:   Linear<B>,
    pub lstm:         Lstm<B>,
    pub dropout:      Dropout,
    pub classifier:   Linear<B>,
    pub num_features: usize,
    pub hidden_size:  usize,
    pub num_classes:  usize,
}

impl<B: Backend> HtrNetwork<B> {
    pub fn input_node(&self) -> NodeSpec {
        NodeSpec::new("input", vec![None, Some(self.num_features)])
    }

    pub fn output_node(&self) -> NodeSpec {
        NodeSpec::new("softmax", vec![None, Some(self.num_classes)])
    }
}

impl<B: Backend> CtcNetwork<B> for HtrNetwork<B> {
    /// features: [batch, time, num_features] → probabilities: [batch, time, num_classes]
    fn forward(&self, features: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = relu(self.projection.forward(features));
        let (x, _state) = self.lstm.forward(x, None);
        let x = self.dropout.forward(x);
        softmax(self.classifier.forward(x), 2)
    }

    fn input_width(&self) -> usize {
        self.num_features
    }

    fn layers(&self) -> Vec<LayerSummary> {
        let shape = |d: usize| format!("(None, None, {d})");
        vec![
            LayerSummary::new("input", "InputLayer", shape(self.num_features), 0),
            LayerSummary::new("projection", "Linear+ReLU", shape(self.hidden_size),
                self.projection.num_params()),
            LayerSummary::new("lstm", "Lstm", shape(self.hidden_size), self.lstm.num_params()),
            LayerSummary::new("dropout", "Dropout", shape(self.hidden_size), 0),
            LayerSummary::new("softmax", "Linear+Softmax", shape(self.num_classes),
                self.classifier.num_params()),
        ]
    }
}
