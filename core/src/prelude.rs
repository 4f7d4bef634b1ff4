pub(crate) use crate::error::{Errno::*, Error};
pub(crate) use crate::layers::bio::BlockId;
pub(crate) use crate::os::{Arc, Box, String, ToString, Vec};
pub(crate) use crate::util::{Aead as _, RandomInit, Rng as _};
pub(crate) use crate::{return_errno, return_errno_with_msg};

pub(crate) type Result<T> = core::result::Result<T, Error>;

pub(crate) use core::fmt::{self, Debug};
pub(crate) use log::{debug, error, info, trace, warn};
