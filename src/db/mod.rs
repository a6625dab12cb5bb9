pub mod spp_invoices;
pub mod spp_payments;
pub mod spp_plans;
