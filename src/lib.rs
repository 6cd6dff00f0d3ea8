// Generalized supervised principal component regression (GSPCR)

#![doc = include_str!("../README.md")]

pub mod config;
pub mod cv;
pub mod data;
pub mod error;
pub mod folds;
pub mod glm;
pub mod measures;
pub mod model;
mod multicategory;
pub mod pca;
pub mod results;
pub mod screening;
pub mod selection;
pub mod thresholds;

pub use config::{Family, FitMeasure, GspcrConfig, Orientation, ThresholdType};
pub use cv::{cv_gspcr, cv_gspcr_with, CvSolution};
pub use data::{Dataset, VariableType};
pub use error::{FitError, GspcrError};
pub use glm::Prediction;
pub use model::GspcrModel;
pub use pca::{ComponentExtractor, ComponentProjection, MixedPca, MixedPcaModel};
pub use results::{CellCounts, CellStatus, ResultsCube, SolutionSurface};
pub use selection::{SelectionRule, SolutionRow, SolutionTable};
