use crate::data::DigitBatch;
use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    prelude::*,
    tensor::{activation::softmax, backend::AutodiffBackend},
    train::{ClassificationOutput, TrainOutput, TrainStep, ValidStep},
};

#[derive(Config, Debug)]
pub struct ModelConfig {
    #[config(default = 10)]
    pub num_classes: usize,
    #[config(default = 64)]
    pub conv_channels: usize,
    #[config(default = 3)]
    pub kernel_size: usize,
    #[config(default = 2)]
    pub pool_size: usize,
    #[config(default = 64)]
    pub dense_hidden: usize,
    #[config(default = 32)]
    pub dense_output: usize,
}

/// Convolution, ReLU, then non-overlapping max pooling.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    pool: MaxPool2d,
    activation: Relu,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(
        channels: [usize; 2],
        kernel_size: usize,
        pool_size: usize,
        device: &B::Device,
    ) -> Self {
        let conv = Conv2dConfig::new(channels, [kernel_size, kernel_size])
            .with_padding(PaddingConfig2d::Valid)
            .init(device);
        let pool = MaxPool2dConfig::new([pool_size, pool_size])
            .with_strides([pool_size, pool_size])
            .init();

        Self {
            conv,
            pool,
            activation: Relu::new(),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(input);
        let x = self.activation.forward(x);

        self.pool.forward(x)
    }
}

#[derive(Module, Debug)]
pub struct Model<B: Backend> {
    conv1: ConvBlock<B>,
    conv2: ConvBlock<B>,
    conv3: ConvBlock<B>,
    linear1: Linear<B>,
    linear2: Linear<B>,
    output: Linear<B>,
    activation: Relu,
}

impl ModelConfig {
    /// Side length of the feature maps left after the three conv blocks on a 28x28 input.
    pub fn feature_size(&self) -> usize {
        (0..3).fold(crate::dataset::IMAGE_SIZE, |size, _| {
            (size - self.kernel_size + 1) / self.pool_size
        })
    }

    /// Returns the initialized model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Model<B> {
        let channels = self.conv_channels;
        let feature_size = self.feature_size();
        let flattened = channels * feature_size * feature_size;

        Model {
            conv1: ConvBlock::new([1, channels], self.kernel_size, self.pool_size, device),
            conv2: ConvBlock::new([channels, channels], self.kernel_size, self.pool_size, device),
            conv3: ConvBlock::new([channels, channels], self.kernel_size, self.pool_size, device),
            linear1: LinearConfig::new(flattened, self.dense_hidden).init(device),
            linear2: LinearConfig::new(self.dense_hidden, self.dense_output).init(device),
            output: LinearConfig::new(self.dense_output, self.num_classes).init(device),
            activation: Relu::new(),
        }
    }
}

impl<B: Backend> Model<B> {
    /// # Shapes
    ///   - Images [batch_size, height, width, 1]
    ///   - Output [batch_size, num_classes] (logits)
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        // [N, H, W, C] -> [N, C, H, W]
        let x = images.swap_dims(2, 3).swap_dims(1, 2);

        let x = self.conv1.forward(x); // [batch_size, 64, 13, 13]
        let x = self.conv2.forward(x); // [batch_size, 64, 5, 5]
        let x = self.conv3.forward(x); // [batch_size, 64, 1, 1]

        let [batch_size, channels, height, width] = x.dims();
        let x = x.reshape([batch_size, channels * height * width]);

        let x = self.linear1.forward(x);
        let x = self.activation.forward(x);
        let x = self.linear2.forward(x);
        let x = self.activation.forward(x);

        self.output.forward(x)
    }

    /// Class probabilities, each row sums to one.
    pub fn probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}

impl<B: AutodiffBackend> TrainStep<DigitBatch<B>, ClassificationOutput<B>> for Model<B> {
    fn step(&self, batch: DigitBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_classification(batch.images, batch.targets);

        TrainOutput::new(self, item.loss.backward(), item)
    }
}

impl<B: Backend> ValidStep<DigitBatch<B>, ClassificationOutput<B>> for Model<B> {
    fn step(&self, batch: DigitBatch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch.images, batch.targets)
    }
}
