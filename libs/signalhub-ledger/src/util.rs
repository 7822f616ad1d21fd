use rand::distr::{Alphanumeric, SampleString};

/// Short random id suffix, uppercased. Keeps generated payout/commission ids
/// unique within a single second.
pub(crate) fn id_suffix(len: usize) -> String {
    Alphanumeric
        .sample_string(&mut rand::rng(), len)
        .to_uppercase()
}
