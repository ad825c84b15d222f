pub use anyhow::{bail, ensure, format_err, Context, Error, Result};
pub use noisy_float::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use std::{
    borrow::Borrow,
    fmt, fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    str::FromStr,
};
pub use tch::{kind::FLOAT_CPU, nn, Device, Kind, Tensor};
pub use tracing::{debug, info, warn};
