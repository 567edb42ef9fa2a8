//! Limine protocol requests.
//!
//! Paging, the memory map, and SMP bring-up are assumed complete before
//! [`crate::_start`] hands off to [`hadron_kernel::kernel_init`] (see that
//! function's module documentation), so the only response this stub reads
//! back is the HHDM offset.

use limine::BaseRevision;
use limine::request::{HhdmRequest, RequestsEndMarker, RequestsStartMarker};

#[used]
#[unsafe(link_section = ".requests_start_marker")]
static _START_MARKER: RequestsStartMarker = RequestsStartMarker::new();

#[used]
#[unsafe(link_section = ".requests")]
pub static BASE_REVISION: BaseRevision = BaseRevision::new();

#[used]
#[unsafe(link_section = ".requests")]
pub static HHDM_REQUEST: HhdmRequest = HhdmRequest::new();

#[used]
#[unsafe(link_section = ".requests_end_marker")]
static _END_MARKER: RequestsEndMarker = RequestsEndMarker::new();
