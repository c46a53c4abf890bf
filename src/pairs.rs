// 🔗 Candidate Pairs - full cross join of organizations and schools

/// Every (organization index, school index) pair, organization-major.
///
/// No blocking predicate is applied, so cardinality is
/// `n_orgs * n_schools`. That is fine for one state's yearly volumes (low
/// thousands on each side). Larger inputs would need a blocking key, which
/// changes recall and must be chosen deliberately.
pub fn generate_pairs(n_orgs: usize, n_schools: usize) -> impl Iterator<Item = (usize, usize)> {
    (0..n_orgs).flat_map(move |org| (0..n_schools).map(move |school| (org, school)))
}
