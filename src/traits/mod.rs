mod num_traits_impls;
mod simba_impls;
mod std_ops;
