#[macro_export]
macro_rules! decision_models_schemas_gen {
    [$($x:ty),*] => {
        vec![
            $(
                $crate::serde_json::to_string_pretty(&$crate::schemars::schema_for!($x))
                    .unwrap_or_default(),
            )*
        ]
    };
}

#[macro_export]
macro_rules! impl_decision_model_standard_parts {
    ($x:ty) => {
        fn body_as_json(&self) -> Option<String> {
            $crate::serde_json::to_string(self).ok()
        }

        fn body_as_msgpack(&self) -> Option<Vec<u8>> {
            $crate::rmp_serde::to_vec(self).ok()
        }

        fn body_as_cbor(&self) -> Option<Vec<u8>> {
            let mut b: Vec<u8> = Vec::new();
            if let Ok(_) = $crate::ciborium::into_writer(self, &mut b) {
                Some(b)
            } else {
                None
            }
        }

        fn category(&self) -> String {
            stringify!($x).to_string()
        }
    };
}

/// Generates `TryFrom<&dyn DecisionModel>` for a concrete decision model.
///
/// The conversion first tries a plain downcast and, failing that, decodes the
/// JSON body of any decision model declaring the same category. The latter is
/// how models loaded from disk into a generic container get specialised again.
#[macro_export]
macro_rules! impl_decision_model_conversion {
    ($x:ty) => {
        impl TryFrom<&dyn $crate::DecisionModel> for $x {
            type Error = &'static str;

            fn try_from(m: &dyn $crate::DecisionModel) -> Result<$x, Self::Error> {
                if let Some(dcasted) = m.downcast_ref::<$x>().map(|x| x.to_owned()) {
                    return Ok(dcasted);
                }
                if $crate::DecisionModel::category(m).as_str() == stringify!($x) {
                    if let Some(j) = $crate::DecisionModel::body_as_json(m) {
                        if let Ok(r) = $crate::serde_json::from_str::<$x>(&j) {
                            return Ok(r);
                        }
                    }
                    return Err("Could not decode the body of the input decision model");
                }
                Err("Could not convert input decision model")
            }
        }
    };
}
