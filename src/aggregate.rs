use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DoctorCounts {
    pub num_diagnosed: u64,
    pub num_operated_on: u64,
}

/// One output row, as handed to the ranking stage and the exporters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DoctorAggregate {
    pub doctor_id: String,
    pub num_diagnosed: u64,
    pub num_operated_on: u64,
}

/// Per-doctor counts keyed by doctor id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DoctorTable {
    by_doctor: BTreeMap<String, DoctorCounts>,
}

impl DoctorTable {
    /// Full outer join of the two per-doctor aggregates. A doctor missing from
    /// either side gets 0 for that count.
    pub fn outer_join(
        diagnosed: impl IntoIterator<Item = (String, u64)>,
        operated_on: impl IntoIterator<Item = (String, u64)>,
    ) -> Self {
        let mut by_doctor: BTreeMap<String, DoctorCounts> = BTreeMap::new();
        for (doctor_id, n) in diagnosed {
            by_doctor.entry(doctor_id).or_default().num_diagnosed = n;
        }
        for (doctor_id, n) in operated_on {
            by_doctor.entry(doctor_id).or_default().num_operated_on = n;
        }
        Self { by_doctor }
    }

    pub fn get(&self, doctor_id: &str) -> Option<DoctorCounts> {
        self.by_doctor.get(doctor_id).copied()
    }

    pub fn len(&self) -> usize {
        self.by_doctor.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_doctor.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, DoctorCounts)> {
        self.by_doctor.iter().map(|(id, c)| (id.as_str(), *c))
    }

    /// Rows ordered by `num_diagnosed` descending, ties broken by doctor id.
    pub fn rows(&self) -> Vec<DoctorAggregate> {
        let mut rows: Vec<DoctorAggregate> = self
            .by_doctor
            .iter()
            .map(|(doctor_id, c)| DoctorAggregate {
                doctor_id: doctor_id.clone(),
                num_diagnosed: c.num_diagnosed,
                num_operated_on: c.num_operated_on,
            })
            .collect();
        rows.sort_by(|a, b| {
            b.num_diagnosed
                .cmp(&a.num_diagnosed)
                .then_with(|| a.doctor_id.cmp(&b.doctor_id))
        });
        rows
    }

    /// Sums over all doctors. A patient seen by two doctors counts once per doctor.
    pub fn totals(&self) -> DoctorCounts {
        self.by_doctor
            .values()
            .fold(DoctorCounts::default(), |acc, c| DoctorCounts {
                num_diagnosed: acc.num_diagnosed + c.num_diagnosed,
                num_operated_on: acc.num_operated_on + c.num_operated_on,
            })
    }
}
