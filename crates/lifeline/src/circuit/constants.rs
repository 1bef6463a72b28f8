// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

/// Default number of consecutive failures that opens a circuit.
pub(crate) const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Default cooldown applied when a circuit first opens.
pub(crate) const DEFAULT_BASE_COOLDOWN: Duration = Duration::from_secs(1);

/// Default upper bound of the exponential cooldown.
pub(crate) const DEFAULT_MAX_COOLDOWN: Duration = Duration::from_secs(30);
