use crate::{element::Accum, tiles::DistributedTensor};

pub trait UnaryOp<F> {
    fn apply(&self, x: F) -> F;
}

macro_rules! impl_unary_ops {
    {
    $(
        $name:ident<$t:ident>($input:ident $(, $state:ident)?) => $body:expr;
    )+
    } => {
      $(
          ::paste::paste! {
              impl_unary_ops!([<$name Op>]<$t>($input $(, $state)?) => $body);
          }
      )+
    };

    ($name:ident<$t:ident>($input:ident, $state:ident) => $body:expr) => {
        #[derive(Clone, Copy, Debug)]
        pub struct $name<$t> { value: $t }

        impl<$t: Accum> $name<$t> {
            pub fn new(value: $t) -> Self {
                $name::<$t> { value }
            }
        }

        impl<$t: Accum> UnaryOp<$t> for $name<$t> {
            #[inline]
            fn apply(&self, $input: $t) -> $t {
                let $state = self.value;
                $body
            }
        }
    };
    ($name:ident<$t:ident>($input:ident) => $body:expr) => {
        #[derive(Clone, Copy, Debug)]
        pub struct $name;

        impl<$t: Accum> UnaryOp<$t> for $name {
            #[inline]
            fn apply(&self, $input: $t) -> $t {
                $body
            }
        }
    };
}

macro_rules! impl_convenience_fns {
    {
        for $ty:ident;
        $(
            $name:ident<$t:ident>($input:ident $(, $state:ident)?) => $body:expr;
        )+
    }
    => {
        ::paste::paste! {
            $(
                impl<$t: Accum> $ty<$t> {
                    pub fn [<$name:snake>](&mut self $(, $state: $t)?) {
                        self.apply_unary_op([<$name Op>] $( ::new ($state))?);
                    }
                }
            )+
        }
    };
}

macro_rules! with_unary_ops {
    ($callback:path ; $($($arg:tt)+)?) => {
        $callback! {
            $($($arg)+;)?

            Zero<F>(_x) => F::zero();
            Fill<F>(_x, f) => f;
            FillNegInf<F>(_x) => F::neg_infinity();

            AddScalar<F>(x, f) => x + f;
            MulScalar<F>(x, f) => x * f;
            DivScalar<F>(x, f) => x / f;

            Neg<F>(x) => -x;

            Exp<F>(x) => x.exp();
            Exp2<F>(x) => x.exp2();
            Log<F>(x) => x.ln();
        }
    };
}

with_unary_ops!(impl_unary_ops;);
with_unary_ops!(impl_convenience_fns; for DistributedTensor);
